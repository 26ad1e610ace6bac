//! Thompson-style promotion selection.

use serde::{Deserialize, Serialize};

/// Per-unit economics for one item on one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionEconomics {
    pub unit_price: f64,
    pub unit_cost: f64,
    /// No-promotion forecast units
    pub baseline_units: f64,
}

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    /// `None` means run no promotion.
    pub discount: Option<f64>,
    /// The posterior draw the decision was made under
    pub sampled_elasticity: f64,
    pub expected_profit: f64,
    /// Profit of not promoting, under the same draw
    pub baseline_profit: f64,
}

/// Sampled expected profit of offering `discount` (0 = no promotion).
///
/// Incremental units `elasticity × discount` are scaled by
/// `1 - cannibalization_rate`.
pub fn sampled_profit(
    economics: &PromotionEconomics,
    elasticity: f64,
    discount: f64,
    cannibalization_rate: f64,
) -> f64 {
    let margin = economics.unit_price * (1.0 - discount) - economics.unit_cost;
    let incremental = elasticity * discount * (1.0 - cannibalization_rate);
    let units = (economics.baseline_units + incremental).max(0.0);
    units * margin
}

/// Best candidate under one elasticity draw. "No promotion" is always
/// evaluated first and wins ties.
pub fn choose(
    economics: &PromotionEconomics,
    candidates: &[f64],
    elasticity: f64,
    cannibalization_rate: f64,
) -> PromotionDecision {
    let baseline_profit = sampled_profit(economics, elasticity, 0.0, cannibalization_rate);
    let mut best = PromotionDecision {
        discount: None,
        sampled_elasticity: elasticity,
        expected_profit: baseline_profit,
        baseline_profit,
    };
    for &d in candidates.iter().filter(|d| **d > 0.0 && **d <= 1.0) {
        let profit = sampled_profit(economics, elasticity, d, cannibalization_rate);
        if profit > best.expected_profit {
            best.discount = Some(d);
            best.expected_profit = profit;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn econ() -> PromotionEconomics {
        PromotionEconomics {
            unit_price: 10.0,
            unit_cost: 4.0,
            baseline_units: 20.0,
        }
    }

    #[test]
    fn test_no_promotion_when_elasticity_is_flat() {
        let d = choose(&econ(), &[0.1, 0.2, 0.3], 0.0, 0.2);
        assert_eq!(d.discount, None);
        assert!((d.expected_profit - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_strong_response_picks_a_discount() {
        // 0.1 off: margin 5, units 20 + 400 * 0.1 * 0.8 = 52 -> 260
        let d = choose(&econ(), &[0.1, 0.5], 400.0, 0.2);
        assert_eq!(d.discount, Some(0.1));
        assert!((d.expected_profit - 260.0).abs() < 1e-9);
    }

    #[test]
    fn test_cannibalization_reduces_profit() {
        let a = sampled_profit(&econ(), 100.0, 0.2, 0.0);
        let b = sampled_profit(&econ(), 100.0, 0.2, 0.2);
        assert!(a > b);
    }
}
