//! Promotion observations and elasticity posteriors.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// A promotion that was applied, with its no-promotion counterfactual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionObservation {
    pub business_id: String,
    pub item_id: String,
    pub category: String,
    pub date: NaiveDate,
    /// Fraction off list price, in (0, 1]
    pub discount_fraction: f64,
    /// Reserved by the exploration budget rather than chosen by the optimiser
    pub was_exploration: bool,
    /// No-promotion point forecast for the day
    pub baseline_forecast: f64,
    pub observed_quantity: f64,
}

impl PromotionObservation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.discount_fraction > 0.0 && self.discount_fraction <= 1.0) {
            return Err(ValidationError::InvalidDiscount(self.discount_fraction));
        }
        if !self.baseline_forecast.is_finite() || self.baseline_forecast < 0.0 {
            return Err(ValidationError::InvalidPromotion(format!(
                "baseline forecast {} for item {}",
                self.baseline_forecast, self.item_id
            )));
        }
        if !self.observed_quantity.is_finite() || self.observed_quantity < 0.0 {
            return Err(ValidationError::InvalidPromotion(format!(
                "observed quantity {} for item {}",
                self.observed_quantity, self.item_id
            )));
        }
        Ok(())
    }

    /// Baseline-controlled uplift per unit of discount:
    /// `(observed - baseline) / discount_fraction`.
    pub fn uplift(&self) -> f64 {
        (self.observed_quantity - self.baseline_forecast) / self.discount_fraction
    }
}

/// Elasticity estimate for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticityPosterior {
    pub item_id: String,
    pub category: String,
    /// Uplift in units per full discount; never below `sign_floor`
    pub mean: f64,
    pub variance: f64,
    pub observation_count: usize,
    pub exploration_count: usize,
    pub sign_floor: f64,
    /// Set when the raw estimate fell below the floor and was clamped
    pub needs_review: bool,
}

impl ElasticityPosterior {
    /// Apply the sign floor, flagging clamped estimates.
    pub(crate) fn floored(mut self) -> Self {
        if self.mean < self.sign_floor || self.mean.is_nan() {
            self.mean = self.sign_floor;
            self.needs_review = true;
        }
        self
    }
}

/// Running moments of a stream of uplifts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UpliftMoments {
    pub n: usize,
    pub sum: f64,
    pub sum_sq: f64,
}

impl UpliftMoments {
    pub fn push(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;
    }

    pub fn merge(&self, other: &UpliftMoments) -> UpliftMoments {
        UpliftMoments {
            n: self.n + other.n,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }

    /// Sample variance, floored at `floor`.
    pub fn variance(&self, floor: f64) -> f64 {
        if self.n < 2 {
            return floor;
        }
        let n = self.n as f64;
        let mean = self.sum / n;
        ((self.sum_sq - n * mean * mean) / (n - 1.0)).max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(discount: f64, baseline: f64, observed: f64) -> PromotionObservation {
        PromotionObservation {
            business_id: "b".into(),
            item_id: "pizza".into(),
            category: "mains".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            discount_fraction: discount,
            was_exploration: true,
            baseline_forecast: baseline,
            observed_quantity: observed,
        }
    }

    #[test]
    fn test_uplift_formula() {
        assert!((obs(0.2, 10.0, 14.0).uplift() - 20.0).abs() < 1e-12);
        assert!((obs(0.5, 10.0, 8.0).uplift() + 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_discount() {
        assert!(obs(0.0, 10.0, 14.0).validate().is_err());
        assert!(obs(1.2, 10.0, 14.0).validate().is_err());
        assert!(obs(f64::NAN, 10.0, 14.0).validate().is_err());
        assert!(obs(1.0, 10.0, 14.0).validate().is_ok());
        assert!(obs(0.3, -1.0, 14.0).validate().is_err());
    }

    #[test]
    fn test_floor_flags_review() {
        let p = ElasticityPosterior {
            item_id: "x".into(),
            category: "c".into(),
            mean: -3.0,
            variance: 1.0,
            observation_count: 1,
            exploration_count: 1,
            sign_floor: -0.2,
            needs_review: false,
        }
        .floored();
        assert_eq!(p.mean, -0.2);
        assert!(p.needs_review);
    }

    #[test]
    fn test_moments() {
        let mut m = UpliftMoments::default();
        for x in [2.0, 4.0, 6.0] {
            m.push(x);
        }
        assert_eq!(m.mean(), Some(4.0));
        assert!((m.variance(0.0) - 4.0).abs() < 1e-12);
        assert_eq!(UpliftMoments::default().variance(1.5), 1.5);
    }
}
