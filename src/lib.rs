// Core modules
mod errors;
mod prelude;

// Shared utilities
pub mod serde_utils;
pub mod types;

// Feature modules
pub mod forecaster;

// Re-exports
pub use errors::{ConfigError, ForecastError, ValidationError};
pub use forecaster::{
    BatchReport, CalibrationRecord, DailyRollup, DriftDetectedSignal, EngineConfig, ForecastDistribution,
    ForecastEngine, IngestOutcome, MonitorState, PosteriorState, Rejection,
};
pub use prelude::Result;
pub use types::*;
