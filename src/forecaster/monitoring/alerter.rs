//! Thread-safe alert history with per-day deduplication.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::forecaster::infra::sync::{read, write};
use crate::forecaster::infra::targets;

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational - no action required
    Info,
    /// Warning - attention recommended
    Warning,
    /// Critical - action required
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARN",
            AlertSeverity::Critical => "CRIT",
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, AlertSeverity::Critical)
    }
}

/// Which health check raised an alert. Also the deduplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    /// 90% interval coverage outside the tolerated band
    Coverage,
    /// Weighted absolute percentage error above threshold
    Wape,
    /// Residual CUSUM crossed the control limit
    Drift,
    /// Elasticity estimates pinned at the sign floor
    ElasticitySignCollapse,
    /// Chronic over- or under-forecasting (staffing proxy)
    StaffingBias,
    /// Weekend demand systematically above forecast
    WeekendUnderforecast,
    /// Stockouts (flagged or inferred) censoring a large share of days
    StockoutBias,
    /// Young series realising outside their intervals too often
    NewItemOverconfidence,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Coverage => "Coverage",
            AlertCategory::Wape => "Wape",
            AlertCategory::Drift => "Drift",
            AlertCategory::ElasticitySignCollapse => "ElasticitySignCollapse",
            AlertCategory::StaffingBias => "StaffingBias",
            AlertCategory::WeekendUnderforecast => "WeekendUnderforecast",
            AlertCategory::StockoutBias => "StockoutBias",
            AlertCategory::NewItemOverconfidence => "NewItemOverconfidence",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured alert for the operational collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub business_id: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub message: String,
    pub detected_at: NaiveDate,
    /// Metric value that triggered the alert
    pub value: Option<f64>,
    /// Threshold that was breached
    pub threshold: Option<f64>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        business_id: impl Into<String>,
        category: AlertCategory,
        severity: AlertSeverity,
        message: impl Into<String>,
        detected_at: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id: business_id.into(),
            category,
            severity,
            message: message.into(),
            detected_at,
            value: None,
            threshold: None,
            acknowledged: false,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// One-line rendering for logs and the replay tool.
    pub fn format(&self) -> String {
        let value_str = self
            .value
            .map(|v| format!(" (value: {v:.4})"))
            .unwrap_or_default();
        let threshold_str = self
            .threshold
            .map(|t| format!(" (threshold: {t:.4})"))
            .unwrap_or_default();
        let ack_str = if self.acknowledged { " [ACK]" } else { "" };
        format!(
            "[{}] {} {} - {}: {}{}{}{}",
            self.detected_at,
            self.severity.as_str(),
            self.business_id,
            self.category,
            self.message,
            value_str,
            threshold_str,
            ack_str,
        )
    }
}

/// Receives every alert that survives deduplication.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, alert: &Alert);
}

/// Logs alerts through `tracing` at a level matching their severity.
pub struct LoggingAlertHandler;

impl AlertHandler for LoggingAlertHandler {
    fn handle(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Info => tracing::info!(
                target: targets::MONITOR,
                business_id = %alert.business_id,
                category = alert.category.as_str(),
                value = ?alert.value,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                target: targets::MONITOR,
                business_id = %alert.business_id,
                category = alert.category.as_str(),
                value = ?alert.value,
                threshold = ?alert.threshold,
                "{}",
                alert.message
            ),
            AlertSeverity::Critical => tracing::error!(
                target: targets::MONITOR,
                business_id = %alert.business_id,
                category = alert.category.as_str(),
                value = ?alert.value,
                threshold = ?alert.threshold,
                "CRITICAL: {}",
                alert.message
            ),
        }
    }
}

/// Bounded alert history.
///
/// At most one alert per (business, category) per day is kept; later ones
/// on the same day are dropped. The oldest alerts are evicted past
/// `max_alerts`.
pub struct Alerter {
    alerts: RwLock<VecDeque<Alert>>,
    max_alerts: usize,
    last_alert_day: RwLock<HashMap<(String, AlertCategory), NaiveDate>>,
    handlers: RwLock<Vec<Box<dyn AlertHandler>>>,
}

impl Alerter {
    pub fn new(max_alerts: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::with_capacity(max_alerts.min(1024))),
            max_alerts,
            last_alert_day: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_handler(&self, handler: Box<dyn AlertHandler>) {
        write(&self.handlers).push(handler);
    }

    /// Claim the (business, category) slot for the alert's day. Check and
    /// insert happen under one write guard.
    fn claim(&self, alert: &Alert) -> bool {
        let mut last = write(&self.last_alert_day);
        match last.entry((alert.business_id.clone(), alert.category)) {
            Entry::Occupied(mut e) => {
                if *e.get() >= alert.detected_at {
                    return false;
                }
                e.insert(alert.detected_at);
            }
            Entry::Vacant(e) => {
                e.insert(alert.detected_at);
            }
        }
        true
    }

    /// Store and dispatch `alert`. Returns `false` if it was deduplicated.
    pub fn emit(&self, alert: Alert) -> bool {
        if !self.claim(&alert) {
            return false;
        }
        for handler in read(&self.handlers).iter() {
            handler.handle(&alert);
        }
        let mut alerts = write(&self.alerts);
        if self.max_alerts == 0 {
            return true;
        }
        while alerts.len() >= self.max_alerts {
            alerts.pop_front();
        }
        alerts.push_back(alert);
        true
    }

    /// Every stored alert, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        read(&self.alerts).iter().cloned().collect()
    }

    pub fn alerts_for(&self, business_id: &str) -> Vec<Alert> {
        read(&self.alerts)
            .iter()
            .filter(|a| a.business_id == business_id)
            .cloned()
            .collect()
    }

    pub fn alerts_by_category(&self, category: AlertCategory) -> Vec<Alert> {
        read(&self.alerts)
            .iter()
            .filter(|a| a.category == category)
            .cloned()
            .collect()
    }

    pub fn unacknowledged(&self) -> Vec<Alert> {
        read(&self.alerts)
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Returns whether an alert with `id` was found.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        match write(&self.alerts).iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn has_critical_alerts(&self) -> bool {
        read(&self.alerts)
            .iter()
            .any(|a| !a.acknowledged && a.severity.is_actionable())
    }

    pub fn count(&self) -> usize {
        read(&self.alerts).len()
    }

    pub fn clear(&self) {
        write(&self.alerts).clear();
        write(&self.last_alert_day).clear();
    }
}

impl fmt::Debug for Alerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alerter")
            .field("alerts", &self.count())
            .field("max_alerts", &self.max_alerts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn alert(business: &str, category: AlertCategory, d: u32) -> Alert {
        Alert::new(business, category, AlertSeverity::Warning, "test", day(d))
    }

    #[test]
    fn test_alert_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Critical);
        assert!(AlertSeverity::Critical.is_actionable());
        assert!(!AlertSeverity::Warning.is_actionable());
    }

    #[test]
    fn test_racing_duplicates_emit_once() {
        let alerter = Alerter::new(100);
        let emitted = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if alerter.emit(alert("b1", AlertCategory::Drift, 5)) {
                        emitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(emitted.load(Ordering::SeqCst), 1);
        assert_eq!(alerter.count(), 1);
    }

    #[test]
    fn test_dedup_per_business_category_day() {
        let alerter = Alerter::new(100);
        assert!(alerter.emit(alert("b1", AlertCategory::Wape, 2)));
        assert!(!alerter.emit(alert("b1", AlertCategory::Wape, 2)));
        assert!(alerter.emit(alert("b1", AlertCategory::Coverage, 2)));
        assert!(alerter.emit(alert("b2", AlertCategory::Wape, 2)));
        assert!(alerter.emit(alert("b1", AlertCategory::Wape, 3)));
        assert_eq!(alerter.count(), 4);
        assert_eq!(alerter.alerts_for("b1").len(), 3);
        assert_eq!(alerter.alerts_by_category(AlertCategory::Wape).len(), 3);
    }

    #[test]
    fn test_history_is_bounded() {
        let alerter = Alerter::new(3);
        for d in 1..=5 {
            alerter.emit(alert("b", AlertCategory::Drift, d));
        }
        let kept = alerter.alerts();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].detected_at, day(3));
    }

    #[test]
    fn test_acknowledge_clears_critical() {
        let alerter = Alerter::new(10);
        let a = Alert::new("b", AlertCategory::Drift, AlertSeverity::Critical, "drift", day(2))
            .with_value(6.0)
            .with_threshold(5.0);
        let id = a.id;
        alerter.emit(a);
        assert!(alerter.has_critical_alerts());
        assert!(alerter.acknowledge(id));
        assert!(!alerter.has_critical_alerts());
        assert!(alerter.unacknowledged().is_empty());
        assert!(alerter.alerts()[0].format().contains("[ACK]"));
    }

    struct Counting(Arc<AtomicUsize>);

    impl AlertHandler for Counting {
        fn handle(&self, _alert: &Alert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_handlers_see_only_emitted_alerts() {
        let seen = Arc::new(AtomicUsize::new(0));
        let alerter = Alerter::new(10);
        alerter.add_handler(Box::new(Counting(seen.clone())));
        alerter.emit(alert("b", AlertCategory::Wape, 2));
        alerter.emit(alert("b", AlertCategory::Wape, 2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
