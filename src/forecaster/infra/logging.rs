//! Structured logging setup.
//!
//! Components log under fixed targets so operators can filter per stage:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `flux_demand::prior` | Hierarchy lookups and population refresh |
//! | `flux_demand::updater` | Per-series posterior updates |
//! | `flux_demand::elasticity` | Exploration and promotion estimates |
//! | `flux_demand::monitor` | Calibration, drift and health checks |
//! | `flux_demand::engine` | Batch ingest and composition |
//!
//! ```bash
//! RUST_LOG=warn,flux_demand::monitor=debug forecast_replay --input batches.jsonl
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable with colors
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Format for stdout logging
    #[serde(default)]
    pub stdout_format: LogFormat,

    /// Enable stdout logging (default: true)
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,

    /// When set, also write JSON logs to a daily rolling file in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Level for the file stream (default: debug)
    #[serde(default = "default_file_level")]
    pub file_level: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

fn default_enable_stdout() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            stdout_format: LogFormat::default(),
            enable_stdout: default_enable_stdout(),
            log_dir: None,
            file_level: default_file_level(),
        }
    }
}

impl LogConfig {
    /// JSON on stdout plus a rolling file stream.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            log_dir: Some(log_dir),
            stdout_format: LogFormat::Json,
            ..Default::default()
        }
    }
}

/// Initialize the global subscriber.
///
/// The returned guards flush the non-blocking file writer on drop and must
/// be held for the life of the program.
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut guards = Vec::new();

    let base_filter = match env_filter_override {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?,
    };

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "flux-demand.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::try_new(&config.file_level)?),
            )
        }
        None => None,
    };

    let stdout_layer = if config.enable_stdout {
        let layer = match config.stdout_format {
            LogFormat::Json => fmt::layer().json().boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
            LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
        };
        Some(layer.with_filter(base_filter))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(guards)
}

/// Log target constants, used with the `target:` field of tracing macros.
pub mod targets {
    pub const PRIOR: &str = "flux_demand::prior";
    pub const UPDATER: &str = "flux_demand::updater";
    pub const ELASTICITY: &str = "flux_demand::elasticity";
    pub const MONITOR: &str = "flux_demand::monitor";
    pub const ENGINE: &str = "flux_demand::engine";
}
