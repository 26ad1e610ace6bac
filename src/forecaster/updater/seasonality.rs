//! Day-of-week seasonality: the shared category pattern, optionally
//! adjusted by a heavily shrunk item-level deviation.

use serde::{Deserialize, Serialize};

/// Seasonality variant carried per series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeasonalityModel {
    /// Shared per-category pattern only
    Shared,
    /// Shared pattern times `exp(deviations[dow])`
    ItemDeviation { deviations: [f64; 7] },
}

impl Default for SeasonalityModel {
    fn default() -> Self {
        SeasonalityModel::Shared
    }
}

impl SeasonalityModel {
    /// Multiplicative factor for a day of week, capped to `[min, max]`.
    pub fn factor(&self, shared: &[f64; 7], dow: usize, min: f64, max: f64) -> f64 {
        let base = shared[dow];
        let f = match self {
            SeasonalityModel::Shared => base,
            SeasonalityModel::ItemDeviation { deviations } => base * deviations[dow].exp(),
        };
        f.clamp(min, max)
    }

    pub fn is_item_level(&self) -> bool {
        matches!(self, SeasonalityModel::ItemDeviation { .. })
    }
}

/// Running per-weekday log residuals of a series against its shared pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DowResiduals {
    pub sum: [f64; 7],
    pub n: [usize; 7],
}

impl DowResiduals {
    /// Record `ln((y + 0.5) / (expected + 0.5))` for one day.
    pub fn record(&mut self, dow: usize, y: f64, expected: f64) {
        self.sum[dow] += ((y + 0.5) / (expected + 0.5)).ln();
        self.n[dow] += 1;
    }
}

/// Normal-Normal shrinkage of item log deviations toward zero.
#[derive(Debug, Clone, Copy)]
pub struct DeviationLearner {
    pub min_days: i64,
    pub prior_variance: f64,
    pub observation_variance: f64,
}

impl DeviationLearner {
    /// Posterior-mean deviations, centred to sum to zero; `Shared` until
    /// the series spans `min_days`.
    pub fn model(&self, residuals: &DowResiduals, elapsed_days: i64) -> SeasonalityModel {
        if elapsed_days < self.min_days {
            return SeasonalityModel::Shared;
        }
        let prior_precision = 1.0 / self.prior_variance;
        let obs_precision = 1.0 / self.observation_variance;
        let mut deviations = [0.0; 7];
        for d in 0..7 {
            let precision = prior_precision + residuals.n[d] as f64 * obs_precision;
            deviations[d] = residuals.sum[d] * obs_precision / precision;
        }
        let centre = deviations.iter().sum::<f64>() / 7.0;
        for dev in deviations.iter_mut() {
            *dev -= centre;
        }
        SeasonalityModel::ItemDeviation { deviations }
    }
}
