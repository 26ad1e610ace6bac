use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// Stockouts censoring a large share of the window.
///
/// Counts flagged stockouts plus suspected unflagged ones: zero sales on an
/// available day for an item forecast at `high_velocity_threshold` units
/// or more.
pub struct StockoutBiasCheck;

impl HealthCheck for StockoutBiasCheck {
    fn name(&self) -> &'static str {
        "stockout_bias"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::StockoutBias
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        let m = ctx.metrics;
        if m.samples < ctx.config.min_samples {
            return None;
        }
        let share = m.stockout_share();
        let threshold = ctx.config.stockout_share_threshold;
        (share > threshold).then(|| {
            CheckFinding::warning(
                format!(
                    "{:.0}% of item-days censored by stockouts ({} flagged, {} suspected)",
                    share * 100.0,
                    m.flagged_stockouts,
                    m.suspected_stockouts
                ),
                share,
                threshold,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::config::MonitorConfig;
    use crate::forecaster::monitoring::checks::testing::{context, metrics};

    #[test]
    fn test_suspected_stockouts_count() {
        let config = MonitorConfig::default();
        let mut m = metrics(20);
        m.flagged_stockouts = 2;
        assert!(StockoutBiasCheck.evaluate(&context(&m, &[], &config)).is_none());
        m.suspected_stockouts = 2;
        let finding = StockoutBiasCheck.evaluate(&context(&m, &[], &config)).unwrap();
        assert!((finding.value - 0.2).abs() < 1e-12);
        assert!(finding.message.contains("2 suspected"));
    }
}
