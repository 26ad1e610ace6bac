use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

pub struct WapeCheck;

impl HealthCheck for WapeCheck {
    fn name(&self) -> &'static str {
        "wape"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Wape
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        if ctx.metrics.available_samples < ctx.config.min_samples {
            return None;
        }
        let wape = ctx.metrics.wape?;
        let threshold = ctx.config.wape_threshold;
        (wape > threshold).then(|| {
            CheckFinding::warning(
                format!("WAPE {:.0}% over the last {} days", wape * 100.0, ctx.metrics.samples),
                wape,
                threshold,
            )
        })
    }
}
