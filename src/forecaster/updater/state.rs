//! Per-series posterior state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::seasonality::{DowResiduals, SeasonalityModel};
use crate::forecaster::likelihood::CountModel;
use crate::forecaster::prior::{PriorLevel, PriorNode};
use crate::types::SeriesKey;

/// Lifecycle phase, derived from observation count and elapsed days only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No data yet
    Cold,
    /// Fewer than `active_min_observations` folded observations
    Warming,
    /// Enough observations, prior weight still above the floor
    Active,
    /// Prior weight at the floor
    Mature,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Cold => "cold",
            Phase::Warming => "warming",
            Phase::Active => "active",
            Phase::Mature => "mature",
        }
    }
}

/// Exposure-weighted sufficient statistics of the deseasonalised rate.
///
/// Each folded day contributes its (possibly imputed) count `y` and its
/// offset `o = dow_factor × exposure`; the data rate estimate is
/// `sum_y / sum_offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStats {
    /// Effective number of folded days
    pub n: f64,
    pub sum_y: f64,
    pub sum_offset: f64,
    pub sum_offset_sq: f64,
    /// Folded days that were right-censored
    pub censored_days: usize,
}

impl DataStats {
    pub fn fold(&mut self, y: f64, offset: f64, censored: bool) {
        self.n += 1.0;
        self.sum_y += y;
        self.sum_offset += offset;
        self.sum_offset_sq += offset * offset;
        if censored {
            self.censored_days += 1;
        }
    }

    /// Data-only estimate of the deseasonalised rate.
    pub fn mean(&self) -> Option<f64> {
        (self.sum_offset > 0.0).then(|| self.sum_y / self.sum_offset)
    }

    /// Sampling variance of [`mean`](Self::mean) under a negative binomial
    /// with dispersion `r`. A half-count floor keeps all-zero histories from
    /// claiming zero uncertainty.
    pub fn variance_of_mean(&self, dispersion: f64) -> Option<f64> {
        let mean = self.mean()?;
        let s = self.sum_offset;
        let m = mean.max(0.5 / s);
        let over = if dispersion.is_finite() {
            m * m * self.sum_offset_sq / dispersion
        } else {
            0.0
        };
        Some((m * s + over) / (s * s))
    }

    /// Scale every sum by `factor`, keeping the mean estimate and widening
    /// its variance.
    pub fn discount(&mut self, factor: f64) {
        self.n *= factor;
        self.sum_y *= factor;
        self.sum_offset *= factor;
        self.sum_offset_sq *= factor;
    }
}

/// Posterior for one (business, item) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorState {
    pub key: SeriesKey,
    /// Gamma shape of the blended deseasonalised rate
    pub shape: f64,
    /// Gamma rate of the blended deseasonalised rate
    pub rate: f64,
    /// Observation dispersion; infinite is the Poisson limit
    #[serde(with = "crate::serde_utils::infinite_as_null")]
    pub dispersion: f64,
    /// Blending target at the last update
    pub prior: PriorNode,
    pub stats: DataStats,
    pub prior_weight: f64,
    pub phase: Phase,
    pub count_model: CountModel,
    pub seasonality: SeasonalityModel,
    pub dow_residuals: DowResiduals,
    /// Folded (open) observations
    pub observations: usize,
    /// Recorded days, including closed days
    pub recorded_days: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Days added to the schedule clock by drift recalibration
    pub relaxation_days: f64,
    /// Incremented on every successful ingest
    pub revision: u64,
    /// Set when the prior fell back to the configured default
    pub low_confidence: bool,
    pub last_updated: DateTime<Utc>,
}

impl PosteriorState {
    /// Fresh state seeded from a prior.
    pub fn cold(key: SeriesKey, prior: PriorNode, dispersion: f64) -> Self {
        let low_confidence = prior.is_default();
        Self {
            key,
            shape: prior.gamma_shape(),
            rate: prior.gamma_rate(),
            dispersion,
            prior,
            stats: DataStats::default(),
            prior_weight: 1.0,
            phase: Phase::Cold,
            count_model: CountModel::NegativeBinomial,
            seasonality: SeasonalityModel::default(),
            dow_residuals: DowResiduals::default(),
            observations: 0,
            recorded_days: 0,
            first_date: None,
            last_date: None,
            relaxation_days: 0.0,
            revision: 0,
            low_confidence,
            last_updated: Utc::now(),
        }
    }

    /// Posterior mean of the deseasonalised rate.
    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    /// Posterior variance of the deseasonalised rate.
    pub fn variance(&self) -> f64 {
        self.shape / (self.rate * self.rate)
    }

    pub fn prior_source(&self) -> PriorLevel {
        self.prior.level
    }

    /// Days since the first observation, or 0 before any.
    pub fn elapsed_days(&self) -> i64 {
        match (self.first_date, self.last_date) {
            (Some(first), Some(last)) => (last - first).num_days(),
            _ => 0,
        }
    }
}
