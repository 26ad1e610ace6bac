use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// Young series (cold or warming) whose intervals are too narrow.
pub struct NewItemOverconfidenceCheck;

impl HealthCheck for NewItemOverconfidenceCheck {
    fn name(&self) -> &'static str {
        "new_item_overconfidence"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::NewItemOverconfidence
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        if ctx.metrics.young_samples < ctx.config.new_item_min_samples {
            return None;
        }
        let coverage = ctx.metrics.young_coverage_90?;
        let floor = ctx.config.new_item_coverage_floor;
        (coverage < floor).then(|| {
            CheckFinding::warning(
                format!(
                    "new items realise inside their 90% intervals only {:.0}% of the time",
                    coverage * 100.0
                ),
                coverage,
                floor,
            )
        })
    }
}
