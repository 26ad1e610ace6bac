//! Statistical properties checked over seeded simulations.

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Gamma, Normal, Poisson};

    use crate::forecaster::config::{ElasticityConfig, LikelihoodConfig, DEFAULT_QUANTILE_LEVELS};
    use crate::forecaster::elasticity::{choose, ElasticityEstimator, PromotionEconomics, PromotionObservation};
    use crate::forecaster::likelihood::special::chi_square_sf;
    use crate::forecaster::likelihood::{CountModel, DemandLikelihoodModel};
    use crate::forecaster::tests::{day, engine_with, feed};
    use crate::types::{DayRecord, SeriesKey};

    fn negative_binomial(rng: &mut SmallRng, mean: f64, dispersion: f64) -> f64 {
        let lambda = Gamma::new(dispersion, mean / dispersion).unwrap().sample(rng);
        Poisson::new(lambda.max(1e-9)).unwrap().sample(rng)
    }

    // =========================================================================
    // Monotone quantiles
    // =========================================================================

    #[test]
    fn test_predictive_quantiles_monotone_over_random_parameters() {
        let model = DemandLikelihoodModel::new(LikelihoodConfig::default());
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..2_000 {
            let rate = 10f64.powf(rng.gen_range(-2.0..2.0));
            let dispersion = if rng.gen_bool(0.2) {
                f64::INFINITY
            } else {
                10f64.powf(rng.gen_range(-0.5..2.5))
            };
            let count_model = if rng.gen_bool(0.3) {
                CountModel::ZeroInflated {
                    pi: rng.gen_range(0.01..0.9),
                }
            } else {
                CountModel::NegativeBinomial
            };
            let q = model.predictive(rate, dispersion, count_model).quantiles(&DEFAULT_QUANTILE_LEVELS);
            assert!(
                q.windows(2).all(|w| w[0] <= w[1]),
                "rate {rate} r {dispersion} {count_model:?}: {q:?}"
            );
        }
    }

    #[test]
    fn test_engine_forecasts_monotone() {
        let engine = engine_with(&[("b1", "pizza", "mains")]);
        let key = SeriesKey::new("b1", "pizza");
        let mut rng = SmallRng::seed_from_u64(2);
        for i in 0..120 {
            let mut record = DayRecord::new(day(i), negative_binomial(&mut rng, 7.0, 3.0));
            if rng.gen_bool(0.05) {
                record.was_available = false;
            }
            if i % 7 == 6 && rng.gen_bool(0.5) {
                record.hours_open = 0.0;
            }
            let outcome = engine.ingest(&key, &record).unwrap();
            for f in &outcome.forecasts {
                assert!(f.is_monotone(), "day {i}: {:?}", f.quantiles);
                assert!(f.q05() <= f.q50() && f.q50() <= f.q95());
            }
        }
    }

    // =========================================================================
    // Prior-weight decay
    // =========================================================================

    #[test]
    fn test_prior_weight_reaches_floor_at_day_ninety() {
        let engine = engine_with(&[("b1", "pizza", "mains")]);
        let key = SeriesKey::new("b1", "pizza");
        let mut weights = Vec::new();
        for i in 0..100 {
            let outcome = engine.ingest(&key, &DayRecord::new(day(i), 5.0)).unwrap();
            weights.push(outcome.state.prior_weight);
        }
        assert_eq!(weights[90], 0.2);
        for k in 0..90 {
            assert!(weights[k + 1] < weights[k], "weight rose or stalled at day {k}");
        }
        assert!(weights[90..].iter().all(|&w| w == 0.2));
    }

    // =========================================================================
    // Censoring correction
    // =========================================================================

    #[test]
    fn test_flagged_stockouts_never_bias_downward() {
        for seed in 0..5 {
            let engine = engine_with(&[("b1", "plain", "mains"), ("b1", "flagged", "mains")]);
            let plain = SeriesKey::new("b1", "plain");
            let flagged = SeriesKey::new("b1", "flagged");
            let mut rng = SmallRng::seed_from_u64(100 + seed);
            let cap = 6.0;
            for i in 0..28 {
                let demand: f64 = Poisson::new(8.0).unwrap().sample(&mut rng);
                let sold = demand.min(cap);
                engine.ingest(&plain, &DayRecord::new(day(i), sold)).unwrap();
                let mut record = DayRecord::new(day(i), sold);
                record.was_available = demand <= cap;
                engine.ingest(&flagged, &record).unwrap();
            }
            let a = engine.state(&plain).unwrap();
            let b = engine.state(&flagged).unwrap();
            assert!(b.stats.censored_days > 0);
            assert!(
                b.mean() >= a.mean(),
                "seed {seed}: flagged {} < plain {}",
                b.mean(),
                a.mean()
            );
        }
    }

    // =========================================================================
    // Overdispersion
    // =========================================================================

    #[test]
    fn test_overdispersed_data_rejects_poisson() {
        let engine = engine_with(&[("b1", "pizza", "mains")]);
        let key = SeriesKey::new("b1", "pizza");
        let mut rng = SmallRng::seed_from_u64(3);
        // Group-order spikes: variance 6 + 36/1.5 = 30 against a mean of 6
        let quantities: Vec<f64> = (0..60).map(|_| negative_binomial(&mut rng, 6.0, 1.5)).collect();
        feed(&engine, &key, &quantities);

        let state = engine.state(&key).unwrap();
        let likelihood = DemandLikelihoodModel::new(LikelihoodConfig::default());
        assert!(!likelihood.is_poisson(state.dispersion), "fitted r = {}", state.dispersion);
        assert!(state.dispersion < 16.0, "fitted r = {}", state.dispersion);
        for f in engine.latest_forecasts(&key) {
            assert!(f.variance > f.point_estimate);
            assert!(f.dispersion.is_some());
        }
    }

    // =========================================================================
    // Exploration independence
    // =========================================================================

    #[test]
    fn test_exploration_independent_of_profit_signal() {
        let estimator = ElasticityEstimator::new(ElasticityConfig::default());
        let economics = PromotionEconomics {
            unit_price: 10.0,
            unit_cost: 4.0,
            baseline_units: 20.0,
        };
        let theta = Normal::new(50.0, 20.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);

        // [explore][promote]
        let mut table = [[0f64; 2]; 2];
        let mut trials = 0usize;
        for b in 0..10 {
            for i in 0..10 {
                let key = SeriesKey::new(format!("b{b}"), format!("i{i}"));
                for d in 0..1_000 {
                    let promote = choose(&economics, &[0.1, 0.2], theta.sample(&mut rng), 0.2)
                        .discount
                        .is_some();
                    let explore = estimator.allocate_exploration(&key, day(d));
                    table[explore as usize][promote as usize] += 1.0;
                    trials += 1;
                }
            }
        }
        assert_eq!(trials, 100_000);

        let explored = table[1][0] + table[1][1];
        let rate = explored / trials as f64;
        assert!((rate - 0.05).abs() < 0.005, "exploration rate {rate}");

        let n = trials as f64;
        let rows = [table[0][0] + table[0][1], explored];
        let cols = [table[0][0] + table[1][0], table[0][1] + table[1][1]];
        let mut statistic = 0.0;
        for r in 0..2 {
            for c in 0..2 {
                let expected = rows[r] * cols[c] / n;
                statistic += (table[r][c] - expected).powi(2) / expected;
            }
        }
        let p = chi_square_sf(statistic, 1.0);
        assert!(p > 1e-4, "chi-square {statistic} (p = {p}) rejects independence");
    }

    // =========================================================================
    // Elasticity sign floor
    // =========================================================================

    #[test]
    fn test_sign_floor_holds_under_adversarial_sequences() {
        let config = ElasticityConfig {
            selection_seed: Some(5),
            ..Default::default()
        };
        let floor = config.sign_floor;
        let estimator = ElasticityEstimator::new(config);
        let mut rng = SmallRng::seed_from_u64(5);
        for n in 0..5_000 {
            let item = format!("i{}", rng.gen_range(0..20));
            let baseline = 10f64.powf(rng.gen_range(0.0..3.0));
            // Mostly collapses, occasionally a spike to flip the sign back
            let observed = if rng.gen_bool(0.9) {
                baseline * rng.gen_range(0.0..0.5)
            } else {
                baseline * rng.gen_range(1.0..3.0)
            };
            let observation = PromotionObservation {
                business_id: "b1".into(),
                item_id: item.clone(),
                category: format!("c{}", rng.gen_range(0..3)),
                date: day(n),
                discount_fraction: rng.gen_range(0.01..=1.0),
                was_exploration: rng.gen_bool(0.3),
                baseline_forecast: baseline,
                observed_quantity: observed,
            };
            let posterior = estimator.record_observation(&observation).unwrap();
            assert!(posterior.mean >= floor, "step {n}: {}", posterior.mean);
            let key = SeriesKey::new("b1", item);
            if let Some(naive) = estimator.naive_estimate(&key) {
                assert!(naive.mean >= floor);
            }
        }
        for (_, e) in estimator.estimates() {
            assert!(e.mean >= floor);
        }
    }
}
