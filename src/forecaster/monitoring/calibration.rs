//! Rolling-window calibration metrics and the residual CUSUM.

use std::collections::VecDeque;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::forecaster::updater::{ForecastDistribution, Phase};
use crate::types::{weekday_index, DayRecord};

/// A realised outcome paired with the forecast that was acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub item_id: String,
    pub category: Option<String>,
    pub date: NaiveDate,
    pub point: f64,
    pub lower_90: f64,
    pub upper_90: f64,
    pub variance: f64,
    pub actual: f64,
    pub was_available: bool,
    /// Phase of the series when the forecast was issued
    pub phase: Phase,
}

impl OutcomeSample {
    pub fn from_forecast(forecast: &ForecastDistribution, record: &DayRecord, category: Option<String>) -> Self {
        Self {
            item_id: forecast.item_id.clone(),
            category,
            date: record.date,
            point: forecast.point_estimate,
            lower_90: forecast.q05(),
            upper_90: forecast.q95(),
            variance: forecast.variance,
            actual: record.quantity_sold,
            was_available: record.was_available,
            phase: forecast.phase,
        }
    }

    pub fn dow(&self) -> usize {
        weekday_index(self.date)
    }

    pub fn covered(&self) -> bool {
        self.actual >= self.lower_90 && self.actual <= self.upper_90
    }

    /// Standardised residual, `None` for a censored outcome.
    pub fn z_score(&self) -> Option<f64> {
        if !self.was_available {
            return None;
        }
        let sd = self.variance.max(1e-9).sqrt();
        Some((self.actual - self.point) / sd)
    }

    pub fn is_young(&self) -> bool {
        matches!(self.phase, Phase::Cold | Phase::Warming)
    }

    fn is_weekend(&self) -> bool {
        self.dow() >= 5
    }
}

/// Metrics over one business's window.
///
/// Accuracy metrics use available days only: a stockout's sale count is a
/// lower bound, not the demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub samples: usize,
    pub available_samples: usize,
    pub wape: Option<f64>,
    pub coverage_90: Option<f64>,
    /// Mean `actual - point` per day of week (0 = Monday), 0 where empty
    pub mean_dow_residual: [f64; 7],
    /// `Σ point / Σ actual`
    pub forecast_ratio: Option<f64>,
    /// `(Σ actual - Σ point) / Σ point` over weekend days
    pub weekend_residual: Option<f64>,
    pub weekend_samples: usize,
    pub flagged_stockouts: usize,
    /// Zero sales on an available day despite a high forecast velocity
    pub suspected_stockouts: usize,
    pub young_samples: usize,
    pub young_coverage_90: Option<f64>,
}

impl WindowMetrics {
    pub fn compute<'a>(samples: impl IntoIterator<Item = &'a OutcomeSample>, velocity_threshold: f64) -> Self {
        let mut m = WindowMetrics::default();
        let (mut abs_err, mut actual_sum, mut point_sum) = (0.0, 0.0, 0.0);
        let (mut weekend_actual, mut weekend_point) = (0.0, 0.0);
        let mut covered = 0usize;
        let mut young_covered = 0usize;
        let mut dow_sum = [0.0; 7];
        let mut dow_n = [0usize; 7];

        for s in samples {
            m.samples += 1;
            if !s.was_available {
                m.flagged_stockouts += 1;
                continue;
            }
            m.available_samples += 1;
            if s.actual == 0.0 && s.point >= velocity_threshold {
                m.suspected_stockouts += 1;
            }
            abs_err += (s.actual - s.point).abs();
            actual_sum += s.actual;
            point_sum += s.point;
            if s.covered() {
                covered += 1;
            }
            if s.is_young() {
                m.young_samples += 1;
                if s.covered() {
                    young_covered += 1;
                }
            }
            if s.is_weekend() {
                m.weekend_samples += 1;
                weekend_actual += s.actual;
                weekend_point += s.point;
            }
            let dow = s.dow();
            dow_sum[dow] += s.actual - s.point;
            dow_n[dow] += 1;
        }

        if m.available_samples > 0 {
            m.coverage_90 = Some(covered as f64 / m.available_samples as f64);
        }
        if actual_sum > 0.0 {
            m.wape = Some(abs_err / actual_sum);
            m.forecast_ratio = Some(point_sum / actual_sum);
        }
        if weekend_point > 0.0 {
            m.weekend_residual = Some((weekend_actual - weekend_point) / weekend_point);
        }
        if m.young_samples > 0 {
            m.young_coverage_90 = Some(young_covered as f64 / m.young_samples as f64);
        }
        for dow in 0..7 {
            if dow_n[dow] > 0 {
                m.mean_dow_residual[dow] = dow_sum[dow] / dow_n[dow] as f64;
            }
        }
        m
    }

    /// Share of window days that were censored, flagged or inferred.
    pub fn stockout_share(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        (self.flagged_stockouts + self.suspected_stockouts) as f64 / self.samples as f64
    }
}

/// Two-sided tabular CUSUM of standardised residuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cusum {
    pub upper: f64,
    pub lower: f64,
    slack: f64,
    limit: f64,
}

impl Cusum {
    pub fn new(slack: f64, limit: f64) -> Self {
        Self {
            upper: 0.0,
            lower: 0.0,
            slack,
            limit,
        }
    }

    pub fn update(&mut self, z: f64) -> f64 {
        self.upper = (self.upper + z - self.slack).max(0.0);
        self.lower = (self.lower - z - self.slack).max(0.0);
        self.score()
    }

    pub fn score(&self) -> f64 {
        self.upper.max(self.lower)
    }

    pub fn exceeded(&self) -> bool {
        self.score() > self.limit
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn reset(&mut self) {
        self.upper = 0.0;
        self.lower = 0.0;
    }
}

/// Fixed-capacity FIFO of outcomes.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutcomeWindow {
    samples: VecDeque<OutcomeSample>,
    capacity: usize,
}

impl OutcomeWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, sample: OutcomeSample) {
        while self.samples.len() >= self.capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &OutcomeSample> {
        self.samples.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }
}
