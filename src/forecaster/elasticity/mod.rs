//! Promotion elasticity estimation under an exploration budget.
//!
//! Promotions chosen by an optimiser tend to land on days when demand is
//! already low, so their observed uplift is confounded. A fixed fraction
//! of slots is reserved for randomised exploration
//! ([`ElasticityEstimator::allocate_exploration`]); only those
//! observations feed the causal estimate. Routine observations are kept
//! for the naive diagnostic only.
//!
//! The item estimate shrinks toward the category pool with item weight
//! `min(1, exploration_count / full_trust_exploration_count)`. No reported
//! mean is ever below `sign_floor`.

mod exploration;
mod posterior;
mod selection;

pub use exploration::slot_hash;
pub use posterior::{ElasticityPosterior, PromotionObservation, UpliftMoments};
pub use selection::{choose, sampled_profit, PromotionDecision, PromotionEconomics};

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use super::config::ElasticityConfig;
use super::infra::sync::{lock, read, write};
use super::infra::targets;
use crate::errors::ForecastError;
use crate::prelude::Result;
use crate::types::SeriesKey;

#[derive(Debug, Clone, Default)]
struct ItemEvidence {
    category: String,
    exploration: UpliftMoments,
    routine: UpliftMoments,
}

/// Item evidence together with the category pools it feeds. Both sides
/// change under the same guard.
#[derive(Debug, Default)]
struct EvidenceStore {
    items: HashMap<SeriesKey, ItemEvidence>,
    /// Exploration uplifts pooled per category
    categories: HashMap<String, UpliftMoments>,
}

/// Elasticity posteriors per item and category.
#[derive(Debug)]
pub struct ElasticityEstimator {
    config: ElasticityConfig,
    evidence: RwLock<EvidenceStore>,
    rng: Mutex<SmallRng>,
}

impl ElasticityEstimator {
    pub fn new(config: ElasticityConfig) -> Self {
        let rng = match config.selection_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            config,
            evidence: RwLock::new(EvidenceStore::default()),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &ElasticityConfig {
        &self.config
    }

    /// Whether the promotion slot for `key` on `date` is reserved for
    /// exploration. Depends only on the configured seed, the key and the
    /// date.
    pub fn allocate_exploration(&self, key: &SeriesKey, date: NaiveDate) -> bool {
        exploration::allocate(self.config.exploration_seed, self.config.exploration_rate, key, date)
    }

    /// Fold one promotion outcome into the item's evidence.
    pub fn record_observation(&self, observation: &PromotionObservation) -> Result<ElasticityPosterior> {
        observation.validate()?;
        let uplift = observation.uplift();
        let key = SeriesKey::new(observation.business_id.clone(), observation.item_id.clone());
        let estimate = {
            let mut guard = write(&self.evidence);
            let store = &mut *guard;
            let evidence = store.items.entry(key.clone()).or_default();
            evidence.category = observation.category.clone();
            if observation.was_exploration {
                evidence.exploration.push(uplift);
                store
                    .categories
                    .entry(observation.category.clone())
                    .or_default()
                    .push(uplift);
            } else {
                evidence.routine.push(uplift);
            }
            self.estimate_in(store, &key)?
        };
        debug!(
            target: targets::ELASTICITY,
            series = %key,
            uplift = uplift,
            exploration = observation.was_exploration,
            "promotion observation recorded"
        );

        if estimate.needs_review {
            warn!(
                target: targets::ELASTICITY,
                series = %key,
                floor = estimate.sign_floor,
                "elasticity clamped at sign floor"
            );
        }
        Ok(estimate)
    }

    /// Category posterior from the configured prior and pooled exploration
    /// uplifts: `(mean, variance)`.
    pub fn category_posterior(&self, category: &str) -> (f64, f64) {
        self.category_posterior_in(&read(&self.evidence), category)
    }

    fn category_posterior_in(&self, store: &EvidenceStore, category: &str) -> (f64, f64) {
        let pool = store.categories.get(category).copied().unwrap_or_default();
        let prior_precision = 1.0 / self.config.category_prior_variance;
        let noise = pool.variance(self.config.min_uplift_variance);
        let data_precision = pool.n as f64 / noise;
        let precision = prior_precision + data_precision;
        let mean = (self.config.category_prior_mean * prior_precision + pool.sum / noise) / precision;
        (mean, 1.0 / precision)
    }

    /// Causal estimate from exploration observations, shrunk toward the
    /// category.
    pub fn estimate(&self, key: &SeriesKey) -> Result<ElasticityPosterior> {
        self.estimate_in(&read(&self.evidence), key)
    }

    fn estimate_in(&self, store: &EvidenceStore, key: &SeriesKey) -> Result<ElasticityPosterior> {
        let evidence = store.items.get(key).ok_or_else(|| {
            ForecastError::from(crate::errors::ValidationError::UnknownItem {
                business_id: key.business_id.clone(),
                item_id: key.item_id.clone(),
            })
        })?;
        let (cat_mean, cat_var) = self.category_posterior_in(store, &evidence.category);
        let explored = evidence.exploration;

        let (mean, variance) = match explored.mean() {
            Some(item_mean) => {
                let w = (explored.n as f64 / self.config.full_trust_exploration_count as f64).min(1.0);
                let item_var = explored.variance(self.config.min_uplift_variance) / explored.n as f64;
                (
                    w * item_mean + (1.0 - w) * cat_mean,
                    w * w * item_var + (1.0 - w) * (1.0 - w) * cat_var,
                )
            }
            None => (cat_mean, cat_var),
        };

        Ok(ElasticityPosterior {
            item_id: key.item_id.clone(),
            category: evidence.category.clone(),
            mean,
            variance,
            observation_count: explored.n + evidence.routine.n,
            exploration_count: explored.n,
            sign_floor: self.config.sign_floor,
            needs_review: false,
        }
        .floored())
    }

    /// Unshrunk mean over every observation, exploration or not. Diagnostic
    /// only: routine promotions are confounded by their selection.
    pub fn naive_estimate(&self, key: &SeriesKey) -> Option<ElasticityPosterior> {
        let evidence = read(&self.evidence).items.get(key).cloned()?;
        let all = evidence.exploration.merge(&evidence.routine);
        let mean = all.mean()?;
        Some(
            ElasticityPosterior {
                item_id: key.item_id.clone(),
                category: evidence.category,
                mean,
                variance: all.variance(self.config.min_uplift_variance) / all.n as f64,
                observation_count: all.n,
                exploration_count: evidence.exploration.n,
                sign_floor: self.config.sign_floor,
                needs_review: false,
            }
            .floored(),
        )
    }

    /// Every tracked item's current estimate, sorted by key.
    pub fn estimates(&self) -> Vec<(SeriesKey, ElasticityPosterior)> {
        let store = read(&self.evidence);
        let mut keys: Vec<&SeriesKey> = store.items.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| self.estimate_in(&store, k).ok().map(|e| (k.clone(), e)))
            .collect()
    }

    /// Choose a discount (or none) by maximising profit under one draw from
    /// the item's posterior.
    pub fn select_promotion(
        &self,
        key: &SeriesKey,
        candidates: &[f64],
        economics: &PromotionEconomics,
    ) -> Result<PromotionDecision> {
        // Items with no evidence yet are drawn from the configured prior
        let (mean, variance) = match self.estimate(key) {
            Ok(p) => (p.mean, p.variance),
            Err(ForecastError::Validation(_)) => (
                self.config.category_prior_mean.max(self.config.sign_floor),
                self.config.category_prior_variance,
            ),
            Err(e) => return Err(e),
        };
        let normal = Normal::new(mean, variance.max(0.0).sqrt()).map_err(|_| ForecastError::NumericDegeneracy {
            quantity: "elasticity variance",
            value: variance,
        })?;
        let draw = normal.sample(&mut *lock(&self.rng));
        let decision = choose(economics, candidates, draw, self.config.cannibalization_rate);
        debug!(
            target: targets::ELASTICITY,
            series = %key,
            draw = draw,
            discount = ?decision.discount,
            "promotion selected"
        );
        Ok(decision)
    }
}

impl Default for ElasticityEstimator {
    fn default() -> Self {
        Self::new(ElasticityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ElasticityEstimator {
        ElasticityEstimator::new(ElasticityConfig {
            selection_seed: Some(11),
            ..Default::default()
        })
    }

    fn obs(item: &str, uplift_units: f64, exploration: bool) -> PromotionObservation {
        PromotionObservation {
            business_id: "b".into(),
            item_id: item.into(),
            category: "mains".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            discount_fraction: 0.5,
            was_exploration: exploration,
            baseline_forecast: 10.0,
            observed_quantity: 10.0 + uplift_units * 0.5,
        }
    }

    #[test]
    fn test_item_weight_reaches_full_trust_at_three() {
        let e = estimator();
        let key = SeriesKey::new("b", "pizza");
        // Category pool comes from other items
        for _ in 0..20 {
            e.record_observation(&obs("other", 4.0, true)).unwrap();
        }
        let one = e.record_observation(&obs("pizza", 12.0, true)).unwrap();
        assert!(one.mean > 4.0 && one.mean < 12.0, "one {}", one.mean);
        e.record_observation(&obs("pizza", 12.0, true)).unwrap();
        let three = e.record_observation(&obs("pizza", 12.0, true)).unwrap();
        assert!((three.mean - 12.0).abs() < 1e-9);
        assert_eq!(three.exploration_count, 3);
        assert_eq!(e.estimate(&key).unwrap().mean, three.mean);
    }

    #[test]
    fn test_routine_observations_do_not_move_causal_estimate() {
        let e = estimator();
        let key = SeriesKey::new("b", "pizza");
        for _ in 0..3 {
            e.record_observation(&obs("pizza", 10.0, true)).unwrap();
        }
        let before = e.estimate(&key).unwrap().mean;
        for _ in 0..50 {
            e.record_observation(&obs("pizza", -1.0, false)).unwrap();
        }
        let after = e.estimate(&key).unwrap();
        assert_eq!(before, after.mean);
        assert_eq!(after.observation_count, 53);
        assert!(e.naive_estimate(&key).unwrap().mean < after.mean);
    }

    #[test]
    fn test_sign_floor_clamps_and_flags() {
        let e = estimator();
        let key = SeriesKey::new("b", "pizza");
        // Sales fall from 10 to 2 under a half-price offer
        for _ in 0..5 {
            e.record_observation(&obs("pizza", -16.0, true)).unwrap();
        }
        let est = e.estimate(&key).unwrap();
        assert_eq!(est.mean, -0.2);
        assert!(est.needs_review);
        assert_eq!(e.naive_estimate(&key).unwrap().mean, -0.2);
    }

    #[test]
    fn test_concurrent_records_keep_item_and_category_in_step() {
        let e = estimator();
        std::thread::scope(|s| {
            for t in 0..4 {
                let e = &e;
                s.spawn(move || {
                    for _ in 0..50 {
                        e.record_observation(&obs(&format!("item{t}"), 4.0, true)).unwrap();
                    }
                });
            }
        });
        let sequential = estimator();
        for t in 0..4 {
            for _ in 0..50 {
                sequential.record_observation(&obs(&format!("item{t}"), 4.0, true)).unwrap();
            }
        }
        let explored: usize = e.estimates().iter().map(|(_, p)| p.exploration_count).sum();
        assert_eq!(explored, 200);
        assert_eq!(e.category_posterior("mains"), sequential.category_posterior("mains"));
    }

    #[test]
    fn test_invalid_discount_rejected() {
        let e = estimator();
        let mut o = obs("pizza", 1.0, true);
        o.discount_fraction = 0.0;
        assert!(e.record_observation(&o).unwrap_err().is_rejection());
        assert!(e.estimate(&SeriesKey::new("b", "pizza")).is_err());
    }

    #[test]
    fn test_select_promotion_explores_under_uncertainty() {
        let e = estimator();
        let key = SeriesKey::new("b", "pizza");
        let econ = PromotionEconomics {
            unit_price: 10.0,
            unit_cost: 4.0,
            baseline_units: 20.0,
        };
        // Break-even for 10% off is an uplift of 50 units; evidence centred
        // near it leaves draws on both sides
        for uplift in [20.0, 80.0, 53.0] {
            e.record_observation(&obs("pizza", uplift, true)).unwrap();
        }
        let mut promoted = 0;
        for _ in 0..200 {
            if e.select_promotion(&key, &[0.1], &econ).unwrap().discount.is_some() {
                promoted += 1;
            }
        }
        assert!(promoted > 10 && promoted < 190, "promoted {promoted}");
    }
}
