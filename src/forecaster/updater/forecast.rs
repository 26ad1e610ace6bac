//! Emitted forecast artifacts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::Phase;
use crate::forecaster::likelihood::DistributionFamily;
use crate::forecaster::prior::PriorLevel;

/// One quantile of a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantilePoint {
    pub level: f64,
    pub value: f64,
}

/// Predictive distribution for one item on one target date.
///
/// Immutable once emitted. A later forecast for the same target is a new
/// value with a higher `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDistribution {
    pub forecast_id: Uuid,
    /// Series revision that produced this forecast
    pub version: u64,
    pub business_id: String,
    pub item_id: String,
    /// Last observed day when the forecast was made
    pub issued_for: NaiveDate,
    pub target_date: NaiveDate,
    pub horizon_days: u32,
    pub point_estimate: f64,
    pub variance: f64,
    /// Sorted by level
    pub quantiles: Vec<QuantilePoint>,
    pub distribution_family: DistributionFamily,
    /// Predictive dispersion after folding in rate uncertainty; `None` is
    /// the Poisson limit
    pub dispersion: Option<f64>,
    pub zero_inflation: f64,
    pub seasonal_factor: f64,
    pub phase: Phase,
    pub prior_source: PriorLevel,
    pub prior_weight: f64,
    pub low_confidence: bool,
    pub confidence_score: f64,
    pub explanation: String,
    pub generated_at: DateTime<Utc>,
}

impl ForecastDistribution {
    /// Quantile at `level`, if it was emitted.
    pub fn quantile(&self, level: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|q| (q.level - level).abs() < 1e-9)
            .map(|q| q.value)
    }

    pub fn q05(&self) -> f64 {
        self.quantile(0.05).unwrap_or(0.0)
    }

    pub fn q50(&self) -> f64 {
        self.quantile(0.50).unwrap_or(self.point_estimate)
    }

    pub fn q95(&self) -> f64 {
        self.quantile(0.95).unwrap_or(f64::INFINITY)
    }

    /// Upper tail for stocking decisions, if emitted.
    pub fn q99(&self) -> Option<f64> {
        self.quantile(0.99)
    }

    /// Whether `actual` falls inside the central 90% interval.
    pub fn covers_90(&self, actual: f64) -> bool {
        actual >= self.q05() && actual <= self.q95()
    }

    pub fn is_monotone(&self) -> bool {
        self.quantiles.windows(2).all(|w| w[0].value <= w[1].value)
    }
}

/// Confidence score that grows with folded observations:
/// `1 / (1 + exp(-(n - 5) / 5))`.
pub fn confidence_score(observations: usize) -> f64 {
    1.0 / (1.0 + (-(observations as f64 - 5.0) / 5.0).exp())
}

/// Short human-readable account of what shaped a forecast.
pub fn explanation(seasonal_factor: f64, observations: usize, source: PriorLevel, low_confidence: bool) -> String {
    let mut parts = Vec::new();
    if (seasonal_factor - 1.0).abs() > 0.1 {
        parts.push(format!("Seasonality {seasonal_factor:.2}x"));
    }
    if observations < 5 {
        parts.push(format!("Cold Start ({source})"));
    }
    if low_confidence {
        parts.push("Low Confidence".to_string());
    }
    if parts.is_empty() {
        "Normal".to_string()
    } else {
        parts.join(", ")
    }
}
