//! Demand likelihood: overdispersed, censoring-aware, zero-inflation-capable
//! count model.
//!
//! The base family is the negative binomial with mean `rate` and variance
//! `rate + rate²/dispersion`. A dispersion that is non-finite or above
//! `poisson_dispersion_threshold` selects the Poisson limit exactly.
//!
//! Days with `was_available = false` are right-censored: the observed
//! quantity is a lower bound on demand and contributes `ln P(Y >= y)`.
//!
//! Zero inflation mixes in a structural-zero component,
//! `P(0) = pi + (1 - pi) P_base(0)`, and is activated per series when the
//! trailing zero-day fraction exceeds `zero_inflation_threshold`.

mod predictive;
pub mod special;

pub use predictive::{CountModel, DistributionFamily, Predictive};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::config::LikelihoodConfig;
use super::infra::targets;
use crate::types::DayRecord;

/// A single observed count as seen by the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountObservation {
    pub count: u64,
    /// Right-censored (stockout) observation.
    pub censored: bool,
}

impl CountObservation {
    pub fn exact(count: u64) -> Self {
        Self {
            count,
            censored: false,
        }
    }

    pub fn censored(count: u64) -> Self {
        Self {
            count,
            censored: true,
        }
    }
}

impl From<&DayRecord> for CountObservation {
    fn from(record: &DayRecord) -> Self {
        Self {
            count: record.count(),
            censored: record.is_censored(),
        }
    }
}

/// Stateless wrapper around the likelihood configuration.
#[derive(Debug, Clone)]
pub struct DemandLikelihoodModel {
    config: LikelihoodConfig,
}

impl Default for DemandLikelihoodModel {
    fn default() -> Self {
        Self::new(LikelihoodConfig::default())
    }
}

impl DemandLikelihoodModel {
    pub fn new(config: LikelihoodConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LikelihoodConfig {
        &self.config
    }

    /// Apply the minimum-rate floor. Non-finite inputs are returned
    /// unchanged so callers can detect degeneracy.
    pub fn floor_rate(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            rate
        } else {
            rate.max(self.config.min_rate)
        }
    }

    /// Whether `dispersion` selects the Poisson limit.
    pub fn is_poisson(&self, dispersion: f64) -> bool {
        !dispersion.is_finite() || dispersion >= self.config.poisson_dispersion_threshold
    }

    /// Build the predictive distribution for a rate and dispersion.
    pub fn predictive(&self, rate: f64, dispersion: f64, model: CountModel) -> Predictive {
        let rate = self.floor_rate(rate);
        let dispersion = if self.is_poisson(dispersion) {
            None
        } else {
            Some(dispersion.max(f64::MIN_POSITIVE))
        };
        Predictive::new(rate, dispersion, model.zero_inflation())
    }

    /// Log-likelihood of one observation under the base negative binomial.
    pub fn log_likelihood(&self, observation: CountObservation, rate: f64, dispersion: f64) -> f64 {
        self.log_likelihood_with(observation, rate, dispersion, CountModel::NegativeBinomial)
    }

    /// Log-likelihood under an explicit count model.
    pub fn log_likelihood_with(
        &self,
        observation: CountObservation,
        rate: f64,
        dispersion: f64,
        model: CountModel,
    ) -> f64 {
        self.predictive(rate, dispersion, model)
            .ln_contribution(observation.count, observation.censored)
    }

    pub fn predictive_quantile(&self, rate: f64, dispersion: f64, q: f64) -> u64 {
        self.predictive(rate, dispersion, CountModel::NegativeBinomial)
            .quantile(q)
    }

    /// Several quantiles computed in one pass over the pmf.
    pub fn predictive_quantiles(&self, rate: f64, dispersion: f64, levels: &[f64]) -> Vec<u64> {
        self.predictive(rate, dispersion, CountModel::NegativeBinomial)
            .quantiles(levels)
    }

    pub fn variance(&self, rate: f64, dispersion: f64) -> f64 {
        self.predictive(rate, dispersion, CountModel::NegativeBinomial)
            .variance()
    }

    /// Dispersion candidates in evaluation order: the Poisson limit first,
    /// then the finite grid from least to most overdispersed.
    pub fn dispersion_candidates(&self) -> Vec<f64> {
        let mut grid = self.config.dispersion_grid.clone();
        grid.sort_by(|a, b| b.total_cmp(a));
        grid.dedup();
        let mut candidates = Vec::with_capacity(grid.len() + 1);
        candidates.push(f64::INFINITY);
        candidates.extend(grid);
        candidates
    }

    /// Pick the grid dispersion with the highest censoring-aware
    /// log-likelihood over `window`, where each entry pairs an observation
    /// with its expected rate. Ties keep the less dispersed candidate.
    pub fn select_dispersion(&self, window: &[(CountObservation, f64)], model: CountModel) -> f64 {
        let mut best = f64::INFINITY;
        let mut best_ll = f64::NEG_INFINITY;
        for r in self.dispersion_candidates() {
            let ll: f64 = window
                .iter()
                .map(|(obs, rate)| self.log_likelihood_with(*obs, *rate, r, model))
                .sum();
            trace!(target: targets::UPDATER, dispersion = r, log_likelihood = ll, "dispersion candidate");
            if ll > best_ll {
                best_ll = ll;
                best = r;
            }
        }
        best
    }

    /// Zero-day fraction over available, open days; `None` when there are
    /// no such days.
    pub fn zero_fraction<'a, I>(&self, records: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a DayRecord>,
    {
        let mut days = 0usize;
        let mut zeros = 0usize;
        for r in records {
            if r.was_available && r.is_open() {
                days += 1;
                if r.count() == 0 {
                    zeros += 1;
                }
            }
        }
        (days > 0).then(|| zeros as f64 / days as f64)
    }

    /// Choose the count model for a series given its trailing zero-day
    /// fraction, overall mean (per day) and dispersion.
    pub fn select_count_model(&self, zero_fraction: Option<f64>, mean: f64, dispersion: f64) -> CountModel {
        match zero_fraction {
            Some(z) if z > self.config.zero_inflation_threshold => {
                let pi = self.fit_zero_inflation(mean, z, dispersion);
                if pi > 0.0 {
                    CountModel::ZeroInflated { pi }
                } else {
                    CountModel::NegativeBinomial
                }
            }
            _ => CountModel::NegativeBinomial,
        }
    }

    /// Structural-zero probability matching the observed zero fraction while
    /// keeping the overall mean fixed.
    ///
    /// Fixed point of `pi = (z - p0(m / (1 - pi))) / (1 - p0(m / (1 - pi)))`,
    /// clamped to `[0, max_zero_inflation]`.
    pub fn fit_zero_inflation(&self, mean: f64, zero_fraction: f64, dispersion: f64) -> f64 {
        let max_pi = self.config.max_zero_inflation;
        let mut pi = 0.0;
        for _ in 0..50 {
            let base_mean = self.floor_rate(mean) / (1.0 - pi);
            let p0 = self
                .predictive(base_mean, dispersion, CountModel::NegativeBinomial)
                .zero_probability();
            let next = if p0 >= 1.0 {
                0.0
            } else {
                ((zero_fraction - p0) / (1.0 - p0)).clamp(0.0, max_pi)
            };
            if (next - pi).abs() < 1e-9 {
                return next;
            }
            pi = next;
        }
        pi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn model() -> DemandLikelihoodModel {
        DemandLikelihoodModel::default()
    }

    #[test]
    fn test_variance_exceeds_poisson_for_finite_dispersion() {
        let m = model();
        for r in [0.5, 1.0, 4.0, 128.0] {
            assert!(m.variance(5.0, r) > 5.0);
        }
        assert!((m.variance(5.0, f64::INFINITY) - 5.0).abs() < 1e-12);
        assert!((m.variance(5.0, 1e9) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_rate_is_floored() {
        let m = model();
        let q = m.predictive_quantiles(0.0, 4.0, &[0.05, 0.5, 0.95]);
        assert_eq!(q, vec![0, 0, 0]);
        assert!(m.log_likelihood(CountObservation::exact(0), 0.0, 4.0).is_finite());
        assert!(m.log_likelihood(CountObservation::exact(3), 0.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_censored_uses_survival() {
        let m = model();
        let exact = m.log_likelihood(CountObservation::exact(8), 5.0, 4.0);
        let censored = m.log_likelihood(CountObservation::censored(8), 5.0, 4.0);
        assert!(censored > exact, "P(Y>=8) must exceed P(Y=8)");
        let p = m.predictive(5.0, 4.0, CountModel::NegativeBinomial);
        assert!((censored - p.survival(8).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_censored_likelihood_prefers_higher_rate() {
        // A stockout at 5 units is more likely under a higher rate
        let m = model();
        let low = m.log_likelihood(CountObservation::censored(5), 3.0, 4.0);
        let high = m.log_likelihood(CountObservation::censored(5), 8.0, 4.0);
        assert!(high > low);
    }

    #[test]
    fn test_poisson_limit_matches_large_dispersion() {
        let m = model();
        let a = m.log_likelihood(CountObservation::exact(4), 4.0, f64::INFINITY);
        let b = m.log_likelihood(CountObservation::exact(4), 4.0, 1e7);
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }

    #[test]
    fn test_select_dispersion_overdispersed_data() {
        let m = model();
        // Mostly small counts with group-order spikes
        let counts = [1, 0, 2, 1, 25, 0, 1, 3, 0, 30, 2, 1, 0, 22];
        let mean = counts.iter().sum::<u64>() as f64 / counts.len() as f64;
        let window: Vec<_> = counts.iter().map(|&c| (CountObservation::exact(c), mean)).collect();
        let r = m.select_dispersion(&window, CountModel::NegativeBinomial);
        assert!(r.is_finite() && r <= 2.0, "selected {r}");
    }

    #[test]
    fn test_select_dispersion_equidispersed_data() {
        let m = model();
        let counts = [5, 5, 5, 5, 5, 5, 5, 5, 5, 5];
        let window: Vec<_> = counts.iter().map(|&c| (CountObservation::exact(c), 5.0)).collect();
        let r = m.select_dispersion(&window, CountModel::NegativeBinomial);
        assert!(r.is_infinite(), "selected {r}");
    }

    #[test]
    fn test_zero_fraction_ignores_closed_and_stockout_days() {
        let m = model();
        let d = |day| NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
        let records = vec![
            DayRecord::new(d(1), 0.0),
            DayRecord::new(d(2), 4.0),
            DayRecord {
                hours_open: 0.0,
                ..DayRecord::new(d(3), 0.0)
            },
            DayRecord {
                was_available: false,
                ..DayRecord::new(d(4), 0.0)
            },
        ];
        assert_eq!(m.zero_fraction(&records), Some(0.5));
        assert_eq!(m.zero_fraction(&records[2..]), None);
    }

    #[test]
    fn test_zero_inflation_activation_threshold() {
        let m = model();
        assert_eq!(
            m.select_count_model(Some(0.35), 3.0, 4.0),
            CountModel::NegativeBinomial
        );
        match m.select_count_model(Some(0.6), 3.0, 4.0) {
            CountModel::ZeroInflated { pi } => assert!(pi > 0.0 && pi <= 0.9),
            other => panic!("expected zero inflation, got {other:?}"),
        }
    }

    #[test]
    fn test_fitted_zero_inflation_matches_zero_fraction() {
        let m = model();
        let pi = m.fit_zero_inflation(3.0, 0.6, 8.0);
        let p = m.predictive(3.0, 8.0, CountModel::ZeroInflated { pi });
        assert!((p.zero_probability() - 0.6).abs() < 1e-3, "p0 = {}", p.zero_probability());
        assert!((p.mean() - 3.0).abs() < 1e-12);
    }
}
