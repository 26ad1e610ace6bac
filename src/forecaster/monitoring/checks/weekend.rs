use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

const MIN_WEEKEND_SAMPLES: usize = 2;

/// Weekend demand systematically above forecast.
pub struct WeekendUnderforecastCheck;

impl HealthCheck for WeekendUnderforecastCheck {
    fn name(&self) -> &'static str {
        "weekend_underforecast"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::WeekendUnderforecast
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        if ctx.metrics.weekend_samples < MIN_WEEKEND_SAMPLES {
            return None;
        }
        let residual = ctx.metrics.weekend_residual?;
        let threshold = ctx.config.weekend_residual_threshold;
        (residual > threshold).then(|| {
            CheckFinding::warning(
                format!("weekend demand {:.0}% above forecast", residual * 100.0),
                residual,
                threshold,
            )
        })
    }
}
