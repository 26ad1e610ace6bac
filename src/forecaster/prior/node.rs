use serde::{Deserialize, Serialize};

/// Hierarchy level a prior was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorLevel {
    Global,
    Category,
    Archetype,
    Item,
    /// Configured wide fallback used when no population exists yet.
    Default,
}

impl PriorLevel {
    pub fn label(&self) -> &'static str {
        match self {
            PriorLevel::Global => "Global Prior",
            PriorLevel::Category => "Category Prior",
            PriorLevel::Archetype => "Archetype Prior",
            PriorLevel::Item => "Item History",
            PriorLevel::Default => "Default Prior",
        }
    }
}

impl std::fmt::Display for PriorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reference to a parent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorRef {
    pub level: PriorLevel,
    pub key: String,
}

/// Prior over the deseasonalised daily rate (units/day at standard hours).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorNode {
    pub level: PriorLevel,
    pub key: String,
    pub mean: f64,
    pub variance: f64,
    pub effective_sample_size: f64,
    pub parent: Option<PriorRef>,
}

impl PriorNode {
    pub fn new(level: PriorLevel, key: impl Into<String>, mean: f64, variance: f64) -> Self {
        Self {
            level,
            key: key.into(),
            mean,
            variance,
            effective_sample_size: 0.0,
            parent: None,
        }
    }

    pub fn with_sample_size(mut self, n: f64) -> Self {
        self.effective_sample_size = n;
        self
    }

    pub fn with_parent(mut self, level: PriorLevel, key: impl Into<String>) -> Self {
        self.parent = Some(PriorRef {
            level,
            key: key.into(),
        });
        self
    }

    /// Coefficient of variation `sqrt(variance) / mean`.
    pub fn width(&self) -> f64 {
        if self.mean <= 0.0 {
            return f64::INFINITY;
        }
        self.variance.max(0.0).sqrt() / self.mean
    }

    /// Gamma shape matching the node's moments.
    pub fn gamma_shape(&self) -> f64 {
        self.mean * self.mean / self.variance
    }

    /// Gamma rate matching the node's moments.
    pub fn gamma_rate(&self) -> f64 {
        self.mean / self.variance
    }

    pub fn is_default(&self) -> bool {
        self.level == PriorLevel::Default
    }
}
