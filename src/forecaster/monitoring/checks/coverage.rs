use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// 90% interval coverage outside `coverage_target ± coverage_tolerance`.
pub struct CoverageCheck;

impl HealthCheck for CoverageCheck {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Coverage
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        let m = ctx.metrics;
        if m.available_samples < ctx.config.min_samples {
            return None;
        }
        let coverage = m.coverage_90?;
        let target = ctx.config.coverage_target;
        let tolerance = ctx.config.coverage_tolerance;
        if coverage < target - tolerance {
            Some(CheckFinding::warning(
                format!(
                    "90% intervals cover {:.0}% of outcomes; intervals are too narrow",
                    coverage * 100.0
                ),
                coverage,
                target - tolerance,
            ))
        } else if coverage > target + tolerance {
            Some(CheckFinding::warning(
                format!(
                    "90% intervals cover {:.0}% of outcomes; intervals are too wide",
                    coverage * 100.0
                ),
                coverage,
                target + tolerance,
            ))
        } else {
            None
        }
    }
}
