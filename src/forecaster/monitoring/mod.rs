//! Calibration and drift monitoring.
//!
//! The monitor consumes realised outcomes paired with the forecasts that
//! were acted upon, keeps a rolling window per business, and once a day
//! rolls the window into a [`CalibrationRecord`] plus tagged alerts.
//!
//! ```text
//! Normal ──(coverage/WAPE out of band)──> Degraded
//!   │                                        │
//!   └────────(CUSUM > limit)──> DriftDetected <┘
//!                                   │ engine relaxes priors
//!                                   v
//!                             Recalibrating ──(healthy)──> Normal
//! ```
//!
//! The monitor never retrains. A transition into `DriftDetected` yields a
//! [`DriftDetectedSignal`] for the caller and a critical alert straight
//! away.

mod alerter;
mod calibration;
pub mod checks;

pub use alerter::{Alert, AlertCategory, AlertHandler, AlertSeverity, Alerter, LoggingAlertHandler};
pub use calibration::{Cusum, OutcomeSample, WindowMetrics};

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use self::calibration::OutcomeWindow;
use self::checks::{default_checks, CheckContext, HealthCheck};
use super::config::MonitorConfig;
use super::elasticity::ElasticityPosterior;
use super::infra::sync::{read, write};
use super::infra::targets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Normal,
    Degraded,
    DriftDetected,
    Recalibrating,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Normal => "NORMAL",
            MonitorState::Degraded => "DEGRADED",
            MonitorState::DriftDetected => "DRIFT_DETECTED",
            MonitorState::Recalibrating => "RECALIBRATING",
        }
    }
}

/// Daily calibration summary for one business. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub business_id: String,
    pub date: NaiveDate,
    pub coverage_90: Option<f64>,
    pub wape: Option<f64>,
    pub mean_dow_residual: [f64; 7],
    pub drift_score: f64,
    pub state: MonitorState,
    pub samples: usize,
}

/// Regime change detected for a business: the caller should relax its
/// priors. A value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDetectedSignal {
    pub business_id: String,
    pub detected_at: NaiveDate,
    pub drift_score: f64,
    pub limit: f64,
}

#[derive(Debug, Clone)]
pub struct DailyRollup {
    pub record: CalibrationRecord,
    /// Alerts emitted by this rollup, after deduplication
    pub alerts: Vec<Alert>,
    pub drift: Option<DriftDetectedSignal>,
}

#[derive(Debug, Clone)]
struct BusinessMonitor {
    window: OutcomeWindow,
    cusum: Cusum,
    state: MonitorState,
}

impl BusinessMonitor {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            window: OutcomeWindow::new(config.window_size),
            cusum: Cusum::new(config.cusum_slack, config.cusum_limit),
            state: MonitorState::Normal,
        }
    }
}

pub struct CalibrationMonitor {
    config: MonitorConfig,
    businesses: RwLock<HashMap<String, BusinessMonitor>>,
    records: RwLock<Vec<CalibrationRecord>>,
    alerter: Alerter,
    checks: Vec<Box<dyn HealthCheck>>,
}

impl CalibrationMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let alerter = Alerter::new(config.max_alerts);
        alerter.add_handler(Box::new(LoggingAlertHandler));
        Self {
            config,
            businesses: RwLock::new(HashMap::new()),
            records: RwLock::new(Vec::new()),
            alerter,
            checks: default_checks(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    pub fn state(&self, business_id: &str) -> MonitorState {
        read(&self.businesses)
            .get(business_id)
            .map(|b| b.state)
            .unwrap_or(MonitorState::Normal)
    }

    /// Current metrics over a business's window.
    pub fn metrics(&self, business_id: &str) -> WindowMetrics {
        read(&self.businesses)
            .get(business_id)
            .map(|b| WindowMetrics::compute(b.window.iter(), self.config.high_velocity_threshold))
            .unwrap_or_default()
    }

    fn drift_alert(&self, signal: &DriftDetectedSignal) -> Alert {
        Alert::new(
            signal.business_id.clone(),
            AlertCategory::Drift,
            AlertSeverity::Critical,
            format!("drift detected: residual CUSUM {:.2}", signal.drift_score),
            signal.detected_at,
        )
        .with_value(signal.drift_score)
        .with_threshold(signal.limit)
    }

    /// Enter `DriftDetected` if the CUSUM is over the limit and the
    /// business is not already there.
    fn detect_drift(&self, business_id: &str, monitor: &mut BusinessMonitor, date: NaiveDate) -> Option<DriftDetectedSignal> {
        if !monitor.cusum.exceeded() || monitor.state == MonitorState::DriftDetected {
            return None;
        }
        monitor.state = MonitorState::DriftDetected;
        let signal = DriftDetectedSignal {
            business_id: business_id.to_string(),
            detected_at: date,
            drift_score: monitor.cusum.score(),
            limit: monitor.cusum.limit(),
        };
        warn!(
            target: targets::MONITOR,
            business_id = business_id,
            score = signal.drift_score,
            "drift detected"
        );
        Some(signal)
    }

    /// Add one realised outcome. Censored outcomes enter the window but not
    /// the CUSUM.
    pub fn record_outcome(&self, business_id: &str, sample: OutcomeSample) -> Option<DriftDetectedSignal> {
        let date = sample.date;
        let signal = {
            let mut businesses = write(&self.businesses);
            let monitor = businesses
                .entry(business_id.to_string())
                .or_insert_with(|| BusinessMonitor::new(&self.config));
            if let Some(z) = sample.z_score() {
                monitor.cusum.update(z);
            }
            monitor.window.push(sample);
            self.detect_drift(business_id, monitor, date)
        };
        if let Some(signal) = &signal {
            self.alerter.emit(self.drift_alert(signal));
        }
        signal
    }

    fn is_degraded(&self, m: &WindowMetrics) -> bool {
        if m.available_samples < self.config.min_samples {
            return false;
        }
        let coverage_bad = m
            .coverage_90
            .is_some_and(|c| (c - self.config.coverage_target).abs() > self.config.coverage_tolerance);
        let wape_bad = m.wape.is_some_and(|w| w > self.config.wape_threshold);
        coverage_bad || wape_bad
    }

    /// Roll up a business's window for `date`: advance the state machine,
    /// run every health check and append a [`CalibrationRecord`].
    pub fn daily_rollup(&self, business_id: &str, date: NaiveDate, elasticities: &[ElasticityPosterior]) -> DailyRollup {
        let (metrics, drift_score, state, drift, previous) = {
            let mut businesses = write(&self.businesses);
            let monitor = businesses
                .entry(business_id.to_string())
                .or_insert_with(|| BusinessMonitor::new(&self.config));
            let previous = monitor.state;
            let metrics = WindowMetrics::compute(monitor.window.iter(), self.config.high_velocity_threshold);
            let drift = self.detect_drift(business_id, monitor, date);
            if drift.is_none() {
                let degraded = self.is_degraded(&metrics);
                monitor.state = match (monitor.state, degraded) {
                    // Waits for the caller to act
                    (MonitorState::DriftDetected, _) => MonitorState::DriftDetected,
                    (MonitorState::Recalibrating, true) => MonitorState::Recalibrating,
                    (_, true) => MonitorState::Degraded,
                    (_, false) => MonitorState::Normal,
                };
            }
            (metrics, monitor.cusum.score(), monitor.state, drift, previous)
        };
        if previous != state {
            info!(
                target: targets::MONITOR,
                business_id = business_id,
                from = previous.as_str(),
                to = state.as_str(),
                "monitor state changed"
            );
        }

        let ctx = CheckContext {
            business_id,
            date,
            metrics: &metrics,
            drift_score,
            elasticities,
            config: &self.config,
        };
        let mut alerts = Vec::new();
        if let Some(signal) = &drift {
            let alert = self.drift_alert(signal);
            if self.alerter.emit(alert.clone()) {
                alerts.push(alert);
            }
        }
        for check in &self.checks {
            if let Some(finding) = check.evaluate(&ctx) {
                let alert = Alert::new(business_id, check.category(), finding.severity, finding.message, date)
                    .with_value(finding.value)
                    .with_threshold(finding.threshold);
                if self.alerter.emit(alert.clone()) {
                    alerts.push(alert);
                }
            }
        }

        let record = CalibrationRecord {
            business_id: business_id.to_string(),
            date,
            coverage_90: metrics.coverage_90,
            wape: metrics.wape,
            mean_dow_residual: metrics.mean_dow_residual,
            drift_score,
            state,
            samples: metrics.samples,
        };
        write(&self.records).push(record.clone());
        DailyRollup { record, alerts, drift }
    }

    /// The caller has relaxed priors for the business. Restarts the CUSUM.
    pub fn mark_recalibrating(&self, business_id: &str) {
        let mut businesses = write(&self.businesses);
        let monitor = businesses
            .entry(business_id.to_string())
            .or_insert_with(|| BusinessMonitor::new(&self.config));
        monitor.state = MonitorState::Recalibrating;
        monitor.cusum.reset();
    }

    /// The full calibration log, in append order.
    pub fn records(&self) -> Vec<CalibrationRecord> {
        read(&self.records).clone()
    }

    pub fn records_for(&self, business_id: &str) -> Vec<CalibrationRecord> {
        read(&self.records)
            .iter()
            .filter(|r| r.business_id == business_id)
            .cloned()
            .collect()
    }
}

impl Default for CalibrationMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl std::fmt::Debug for CalibrationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationMonitor")
            .field("config", &self.config)
            .field("businesses", &read(&self.businesses).len())
            .field("alerter", &self.alerter)
            .finish()
    }
}
