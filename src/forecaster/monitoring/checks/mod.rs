//! Independent, named health checks.
//!
//! Each check reads the same [`CheckContext`] and produces at most one
//! [`CheckFinding`], which the monitor turns into an [`Alert`] tagged with
//! the check's category. Checks share no state, so each can be exercised
//! in isolation.
//!
//! [`Alert`]: super::Alert

mod coverage;
mod drift;
mod elasticity_sign;
mod new_item;
mod staffing;
mod stockout;
mod wape;
mod weekend;

pub use coverage::CoverageCheck;
pub use drift::DriftCheck;
pub use elasticity_sign::ElasticitySignCollapseCheck;
pub use new_item::NewItemOverconfidenceCheck;
pub use staffing::StaffingBiasCheck;
pub use stockout::StockoutBiasCheck;
pub use wape::WapeCheck;
pub use weekend::WeekendUnderforecastCheck;

use chrono::NaiveDate;

use super::alerter::{AlertCategory, AlertSeverity};
use super::calibration::WindowMetrics;
use crate::forecaster::config::MonitorConfig;
use crate::forecaster::elasticity::ElasticityPosterior;

/// Everything a check may look at for one business on one day.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub business_id: &'a str,
    pub date: NaiveDate,
    pub metrics: &'a WindowMetrics,
    pub drift_score: f64,
    pub elasticities: &'a [ElasticityPosterior],
    pub config: &'a MonitorConfig,
}

/// A check's verdict when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckFinding {
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

impl CheckFinding {
    pub fn warning(message: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            severity: AlertSeverity::Warning,
            message: message.into(),
            value,
            threshold,
        }
    }

    pub fn critical(message: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            severity: AlertSeverity::Critical,
            ..Self::warning(message, value, threshold)
        }
    }
}

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> AlertCategory;

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding>;
}

/// The full set of checks run by every daily rollup.
pub fn default_checks() -> Vec<Box<dyn HealthCheck>> {
    vec![
        Box::new(CoverageCheck),
        Box::new(WapeCheck),
        Box::new(DriftCheck),
        Box::new(ElasticitySignCollapseCheck),
        Box::new(StaffingBiasCheck),
        Box::new(WeekendUnderforecastCheck),
        Box::new(StockoutBiasCheck),
        Box::new(NewItemOverconfidenceCheck),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn context<'a>(
        metrics: &'a WindowMetrics,
        elasticities: &'a [ElasticityPosterior],
        config: &'a MonitorConfig,
    ) -> CheckContext<'a> {
        CheckContext {
            business_id: "b1",
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            metrics,
            drift_score: 0.0,
            elasticities,
            config,
        }
    }

    pub(crate) fn metrics(samples: usize) -> WindowMetrics {
        WindowMetrics {
            samples,
            available_samples: samples,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_checks_have_distinct_categories() {
        let checks = default_checks();
        let mut categories: Vec<AlertCategory> = checks.iter().map(|c| c.category()).collect();
        categories.sort();
        categories.dedup();
        assert_eq!(categories.len(), 8);
    }

    #[test]
    fn test_quiet_context_fires_nothing() {
        let config = MonitorConfig::default();
        let mut m = testing::metrics(20);
        m.wape = Some(0.2);
        m.coverage_90 = Some(0.9);
        m.forecast_ratio = Some(1.0);
        let ctx = testing::context(&m, &[], &config);
        for check in default_checks() {
            assert!(check.evaluate(&ctx).is_none(), "{} fired", check.name());
        }
    }
}
