//! Nearest-neighbour prior transfer for businesses with no item data yet.

use super::node::{PriorLevel, PriorNode};
use super::population::{BusinessSummary, PopulationPriors};
use crate::forecaster::config::PriorConfig;
use crate::types::{BusinessFeatures, BusinessProfile};

/// Weighted distance between two feature vectors: a flat penalty for a
/// cuisine mismatch plus Euclidean distance over the normalised numeric
/// coordinates.
pub fn feature_distance(a: &BusinessFeatures, b: &BusinessFeatures, cuisine_penalty: f64) -> f64 {
    let penalty = if a.cuisine.eq_ignore_ascii_case(&b.cuisine) {
        0.0
    } else {
        cuisine_penalty
    };
    let (x, y) = (a.normalized(), b.normalized());
    let euclid = x
        .iter()
        .zip(y.iter())
        .map(|(p, q)| (p - q).powi(2))
        .sum::<f64>()
        .sqrt();
    penalty + euclid
}

/// Prior seeded from the `k` most similar mature businesses, weighted by
/// inverse distance. `None` when no other business has a summary.
pub(crate) fn nearest_archetype(
    snapshot: &PopulationPriors,
    profile: &BusinessProfile,
    config: &PriorConfig,
) -> Option<PriorNode> {
    let mut neighbours: Vec<(f64, &BusinessSummary)> = snapshot
        .businesses
        .iter()
        .filter(|b| b.business_id != profile.business_id)
        .map(|b| {
            (
                feature_distance(&profile.features, &b.features, config.cuisine_mismatch_penalty),
                b,
            )
        })
        .collect();
    if neighbours.is_empty() {
        return None;
    }
    neighbours.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.business_id.cmp(&b.1.business_id))
    });
    neighbours.truncate(config.archetype_neighbors);

    let weights: Vec<f64> = neighbours.iter().map(|(d, _)| 1.0 / (d + 1e-3)).collect();
    let total: f64 = weights.iter().sum();
    let mean = neighbours
        .iter()
        .zip(&weights)
        .map(|((_, b), w)| w * b.mean_rate)
        .sum::<f64>()
        / total;
    // Spread between neighbours plus the average spread within each
    let between = neighbours
        .iter()
        .zip(&weights)
        .map(|((_, b), w)| w * (b.mean_rate - mean).powi(2))
        .sum::<f64>()
        / total;
    let within = neighbours
        .iter()
        .zip(&weights)
        .map(|((_, b), w)| w * b.rate_variance)
        .sum::<f64>()
        / total;

    let key = profile
        .archetype
        .clone()
        .unwrap_or_else(|| format!("knn:{}", profile.business_id));
    Some(
        PriorNode::new(
            PriorLevel::Archetype,
            key,
            mean.max(0.0),
            (between + within).max(config.min_prior_variance),
        )
        .with_sample_size(neighbours.len() as f64)
        .with_parent(PriorLevel::Global, "global"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(cuisine: &str, tier: f64, density: f64, size: f64) -> BusinessFeatures {
        BusinessFeatures {
            cuisine: cuisine.to_string(),
            price_tier: tier,
            location_density: density,
            size,
        }
    }

    fn summary(id: &str, f: BusinessFeatures, mean: f64) -> BusinessSummary {
        BusinessSummary {
            business_id: id.to_string(),
            features: f,
            mean_rate: mean,
            rate_variance: 1.0,
            mature_items: 10,
        }
    }

    #[test]
    fn test_cuisine_mismatch_dominates_distance() {
        let a = features("pizza", 2.0, 0.5, 40.0);
        let b = features("sushi", 2.0, 0.5, 40.0);
        let c = features("pizza", 3.0, 0.9, 120.0);
        assert!(feature_distance(&a, &b, 1.0) > feature_distance(&a, &c, 1.0));
        assert_eq!(feature_distance(&a, &a, 1.0), 0.0);
    }

    #[test]
    fn test_nearest_archetype_weights_close_neighbours() {
        let config = PriorConfig::default();
        let snapshot = PopulationPriors {
            businesses: vec![
                summary("p1", features("pizza", 2.0, 0.5, 40.0), 20.0),
                summary("p2", features("pizza", 2.0, 0.6, 45.0), 22.0),
                summary("s1", features("sushi", 4.0, 0.9, 200.0), 5.0),
            ],
            ..Default::default()
        };
        let profile = BusinessProfile::new("new", features("pizza", 2.0, 0.55, 42.0));
        let node = nearest_archetype(&snapshot, &profile, &config).unwrap();
        assert_eq!(node.level, PriorLevel::Archetype);
        assert!(node.mean > 18.0 && node.mean < 22.0, "mean {}", node.mean);
        assert_eq!(node.effective_sample_size, 3.0);
    }

    #[test]
    fn test_nearest_archetype_excludes_self_and_handles_empty() {
        let config = PriorConfig::default();
        let f = features("pizza", 2.0, 0.5, 40.0);
        let snapshot = PopulationPriors {
            businesses: vec![summary("self", f.clone(), 20.0)],
            ..Default::default()
        };
        let profile = BusinessProfile::new("self", f);
        assert!(nearest_archetype(&snapshot, &profile, &config).is_none());
    }
}
