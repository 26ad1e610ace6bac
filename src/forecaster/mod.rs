//! Adaptive demand forecasting.
//!
//! # Architecture
//!
//! ```text
//! observations ──> PriorHierarchy ──> SequentialPosteriorUpdater ──> ForecastDistribution
//!                  (batch refresh)     (per series, daily)              │
//!                                                                       v
//! promotions ───> ElasticityEstimator ──────────────────────> CalibrationMonitor ──> alerts
//!                 (exploration budget)                         (rolling window, CUSUM)
//! ```
//!
//! [`ForecastEngine`] owns one of each and is the entry point for callers.
//! The components are usable on their own for offline analysis.

pub mod config;
pub mod elasticity;
mod engine;
pub mod infra;
pub mod likelihood;
pub mod monitoring;
pub mod prior;
pub mod updater;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use engine::{BatchReport, ForecastEngine, Rejection};
pub use monitoring::{CalibrationRecord, DailyRollup, DriftDetectedSignal, MonitorState};
pub use updater::{ForecastDistribution, IngestOutcome, PosteriorState};
