use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// Chronic over- or under-forecasting, the proxy for staffing errors.
///
/// Fires when `Σ forecast / Σ actual` over the window leaves
/// `[forecast_ratio_low, forecast_ratio_high]`.
pub struct StaffingBiasCheck;

impl HealthCheck for StaffingBiasCheck {
    fn name(&self) -> &'static str {
        "staffing_bias"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::StaffingBias
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        if ctx.metrics.available_samples < ctx.config.min_samples {
            return None;
        }
        let ratio = ctx.metrics.forecast_ratio?;
        if ratio < ctx.config.forecast_ratio_low {
            Some(CheckFinding::warning(
                format!("forecasts run at {:.0}% of actual demand; understaffing risk", ratio * 100.0),
                ratio,
                ctx.config.forecast_ratio_low,
            ))
        } else if ratio > ctx.config.forecast_ratio_high {
            Some(CheckFinding::warning(
                format!("forecasts run at {:.0}% of actual demand; overstaffing risk", ratio * 100.0),
                ratio,
                ctx.config.forecast_ratio_high,
            ))
        } else {
            None
        }
    }
}
