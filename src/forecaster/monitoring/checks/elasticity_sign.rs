use super::{CheckContext, CheckFinding, HealthCheck};
use crate::forecaster::monitoring::alerter::AlertCategory;

/// Elasticity estimates pinned at the sign floor.
///
/// A flagged item's evidence says promotions shrink sales, which usually
/// means confounded baselines rather than real behaviour.
pub struct ElasticitySignCollapseCheck;

impl HealthCheck for ElasticitySignCollapseCheck {
    fn name(&self) -> &'static str {
        "elasticity_sign_collapse"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::ElasticitySignCollapse
    }

    fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<CheckFinding> {
        let flagged: Vec<&str> = ctx
            .elasticities
            .iter()
            .filter(|e| e.needs_review)
            .map(|e| e.item_id.as_str())
            .collect();
        if flagged.is_empty() {
            return None;
        }
        let floor = ctx.elasticities[0].sign_floor;
        Some(CheckFinding::warning(
            format!(
                "{} of {} items have elasticity clamped at the sign floor: {}",
                flagged.len(),
                ctx.elasticities.len(),
                flagged.join(", ")
            ),
            flagged.len() as f64,
            floor,
        ))
    }
}
