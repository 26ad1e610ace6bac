//! Business identity and the feature vector used for archetype transfer.

use serde::{Deserialize, Serialize};

/// Features describing a business for nearest-neighbour prior transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessFeatures {
    /// Cuisine label, compared by exact match
    pub cuisine: String,
    /// Price tier, 1 (budget) to 4 (luxury)
    pub price_tier: f64,
    /// Location density in [0, 1] (rural to dense urban)
    pub location_density: f64,
    /// Size, e.g. seat count
    pub size: f64,
}

impl Default for BusinessFeatures {
    fn default() -> Self {
        Self {
            cuisine: String::new(),
            price_tier: 2.0,
            location_density: 0.5,
            size: 40.0,
        }
    }
}

impl BusinessFeatures {
    /// Numeric part of the feature vector, each coordinate roughly in [0, 1].
    pub fn normalized(&self) -> [f64; 3] {
        [
            ((self.price_tier - 1.0) / 3.0).clamp(0.0, 1.0),
            self.location_density.clamp(0.0, 1.0),
            ((1.0 + self.size.max(0.0)).ln() / 500f64.ln()).clamp(0.0, 1.5),
        ]
    }
}

/// A business registered with the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub business_id: String,
    /// Cluster assignment; may be reassigned as data accrues.
    #[serde(default)]
    pub archetype: Option<String>,
    pub features: BusinessFeatures,
}

impl BusinessProfile {
    pub fn new(business_id: impl Into<String>, features: BusinessFeatures) -> Self {
        Self {
            business_id: business_id.into(),
            archetype: None,
            features,
        }
    }

    pub fn with_archetype(mut self, archetype: impl Into<String>) -> Self {
        self.archetype = Some(archetype.into());
        self
    }
}
