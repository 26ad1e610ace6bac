//! Forecast Replay
//!
//! Replays a JSONL file of daily observation batches through the engine and
//! writes one report line per batch, followed by a summary with the
//! calibration log and raised alerts.
//!
//! Usage:
//!   forecast_replay --catalog catalog.json --input batches.jsonl [OPTIONS]
//!
//! Options:
//!   --config <FILE>         Engine configuration (TOML)
//!   --output <FILE>         Write reports here instead of stdout
//!   --refresh-every <N>     Refresh population priors every N batch days (default: 7)
//!   --production-logs <DIR> JSON stdout plus rolling JSON files under DIR
//!   --sample-config         Print the default configuration and exit
//!
//! The catalog lists businesses and their items:
//!
//! ```json
//! {
//!   "businesses": [{"business_id": "b1", "features": {"cuisine": "pizza", "price_tier": 2, "location_density": 0.8, "size": 40}}],
//!   "items": [{"business_id": "b1", "item_id": "margherita", "category": "mains"}]
//! }
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flux_demand::forecaster::infra::{init_logging, LogConfig};
use flux_demand::forecaster::monitoring::Alert;
use flux_demand::{BatchReport, BusinessProfile, CalibrationRecord, EngineConfig, ForecastEngine, ObservationBatch, SeriesKey};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "forecast_replay")]
#[command(version, about = "Replay observation batches through the demand forecaster")]
struct Cli {
    /// Engine configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Business and item catalog (JSON)
    #[arg(long, required_unless_present = "sample_config")]
    catalog: Option<PathBuf>,

    /// Observation batches, one JSON object per line
    #[arg(short, long, required_unless_present = "sample_config")]
    input: Option<PathBuf>,

    /// Output file for JSONL reports (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Refresh population priors after this many distinct batch days
    #[arg(long, default_value = "7")]
    refresh_every: usize,

    /// Log filter, overrides RUST_LOG and the config level
    #[arg(long)]
    log_level: Option<String>,

    /// JSON logs on stdout plus a daily rolling file in this directory,
    /// replacing the config's logging section
    #[arg(long, value_name = "DIR")]
    production_logs: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    sample_config: bool,
}

// ============================================================================
// Catalog and Output
// ============================================================================

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    businesses: Vec<BusinessProfile>,
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    business_id: String,
    item_id: String,
    category: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Batch(&'a BatchReport),
    Summary {
        batches: usize,
        accepted: usize,
        rejected: usize,
        calibration: Vec<CalibrationRecord>,
        alerts: Vec<Alert>,
    },
}

// ============================================================================
// Replay
// ============================================================================

fn load_catalog(engine: &ForecastEngine, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let catalog: Catalog = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    for profile in catalog.businesses {
        engine.register_business(profile);
    }
    let items = catalog.items.len();
    for item in catalog.items {
        engine.register_item(SeriesKey::new(item.business_id, item.item_id), item.category);
    }
    info!(items, "catalog loaded");
    Ok(())
}

fn log_config(cli: &Cli, config: &EngineConfig) -> LogConfig {
    match &cli.production_logs {
        Some(dir) => LogConfig::production(dir.clone()),
        None => config.logging.clone(),
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.sample_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let _guards = init_logging(&log_config(&cli, &config), cli.log_level.as_deref())?;
    let engine = ForecastEngine::new(config)?;

    let (Some(catalog), Some(input)) = (&cli.catalog, &cli.input) else {
        return Err("--catalog and --input are required".into());
    };
    load_catalog(&engine, catalog)?;

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let mut days_seen: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut businesses_on_day: BTreeSet<String> = BTreeSet::new();
    let mut current_day: Option<NaiveDate> = None;
    let (mut batches, mut accepted, mut rejected) = (0usize, 0usize, 0usize);

    for (line_no, line) in BufReader::new(File::open(input)?).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch: ObservationBatch = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed batch");
                continue;
            }
        };

        // Close out the previous day before moving on
        if batch.date != current_day {
            if let Some(day) = current_day {
                rollup_day(&engine, day, &businesses_on_day);
            }
            businesses_on_day.clear();
            current_day = batch.date;
            if let Some(day) = batch.date {
                if days_seen.insert(day) && cli.refresh_every > 0 && days_seen.len() % cli.refresh_every == 0 {
                    let report = engine.refresh_population_priors();
                    info!(version = report.version, mature_items = report.mature_items, "population priors refreshed");
                }
            }
        }
        businesses_on_day.insert(batch.business_id.clone());

        let report = engine.ingest_batch(&batch);
        batches += 1;
        accepted += report.accepted;
        rejected += report.rejections.len();
        serde_json::to_writer(&mut out, &OutputLine::Batch(&report))?;
        writeln!(out)?;
    }
    if let Some(day) = current_day {
        rollup_day(&engine, day, &businesses_on_day);
    }

    let summary = OutputLine::Summary {
        batches,
        accepted,
        rejected,
        calibration: engine.monitor().records(),
        alerts: engine.alerts(),
    };
    serde_json::to_writer(&mut out, &summary)?;
    writeln!(out)?;
    out.flush()?;

    info!(batches, accepted, rejected, "replay complete");
    Ok(())
}

fn rollup_day(engine: &ForecastEngine, day: NaiveDate, businesses: &BTreeSet<String>) {
    for business_id in businesses {
        match engine.daily_rollup(business_id, day) {
            Ok(rollup) => {
                for alert in &rollup.alerts {
                    info!(business_id = %business_id, alert = %alert.format(), "alert raised");
                }
            }
            Err(e) => warn!(business_id = %business_id, %day, error = %e, "daily rollup failed"),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("forecast_replay: {e}");
        std::process::exit(1);
    }
}
