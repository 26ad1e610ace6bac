use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// Residual CUSUM above the control limit.
pub struct DriftCheck;

impl HealthCheck for DriftCheck {
    fn name(&self) -> &'static str {
        "drift"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Drift
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        let limit = ctx.config.cusum_limit;
        (ctx.drift_score > limit).then(|| {
            CheckFinding::critical(
                format!("residual CUSUM {:.2} exceeds control limit", ctx.drift_score),
                ctx.drift_score,
                limit,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::config::MonitorConfig;
    use crate::forecaster::monitoring::alerter::AlertSeverity;
    use crate::forecaster::monitoring::checks::testing::{context, metrics};

    #[test]
    fn test_critical_above_limit() {
        let config = MonitorConfig::default();
        let m = metrics(0);
        let mut ctx = context(&m, &[], &config);
        ctx.drift_score = 5.0;
        assert!(DriftCheck.evaluate(&ctx).is_none());
        ctx.drift_score = 5.5;
        assert_eq!(DriftCheck.evaluate(&ctx).unwrap().severity, AlertSeverity::Critical);
    }
}
