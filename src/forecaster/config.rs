//! Deployment-level configuration for the forecasting engine.
//!
//! Every option has a documented default and is fixed at engine
//! construction; there is no per-call override. Load from TOML with
//! [`EngineConfig::from_toml_str`] or [`EngineConfig::load`].
//!
//! ```toml
//! [elasticity]
//! exploration_rate = 0.05
//! sign_floor = -0.2
//!
//! [updater]
//! prior_weight_floor = 0.2
//! prior_weight_horizon_days = 90
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::infra::LogConfig;
use crate::errors::ConfigError;
use crate::prelude::Result;

/// Quantile levels emitted on every forecast.
pub const DEFAULT_QUANTILE_LEVELS: [f64; 8] = [0.05, 0.10, 0.25, 0.50, 0.75, 0.90, 0.95, 0.99];

/// Configuration for the prior hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Mean of the cold-platform fallback prior (units/day). Default 4.0
    pub default_prior_mean: f64,
    /// Variance of the fallback prior. Default 8.0, i.e. Gamma(2, 0.5)
    pub default_prior_variance: f64,
    /// Observations before an item-level prior may be used. Default 20
    pub mature_item_min_observations: usize,
    /// Elapsed days before an item-level prior may be used. Default 14
    pub mature_item_min_days: i64,
    /// Maximum coefficient of variation (sqrt(var)/mean) for an item-level
    /// prior to be used. Default 0.3
    pub item_prior_max_width: f64,
    /// Days of history for an item to enter the population refresh. Default 60
    pub population_min_days: i64,
    /// Non-zero days for an item to enter the population refresh. Default 20
    pub population_min_nonzero_days: usize,
    /// Neighbours used by archetype transfer. Default 5
    pub archetype_neighbors: usize,
    /// Penalty added to the feature distance when cuisines differ. Default 1.0
    pub cuisine_mismatch_penalty: f64,
    /// Floor on any population-level prior variance. Default 0.05
    pub min_prior_variance: f64,
    /// Prior variance of the shared day-of-week log-factors. Default 0.25
    pub dow_shared_prior_variance: f64,
    /// Observation noise of a single day's log ratio when learning
    /// day-of-week factors. Default 0.5
    pub dow_observation_variance: f64,
    /// Lower cap on any day-of-week factor. Default 0.3
    pub dow_min_factor: f64,
    /// Upper cap on any day-of-week factor. Default 3.0
    pub dow_max_factor: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            default_prior_mean: 4.0,
            default_prior_variance: 8.0,
            mature_item_min_observations: 20,
            mature_item_min_days: 14,
            item_prior_max_width: 0.3,
            population_min_days: 60,
            population_min_nonzero_days: 20,
            archetype_neighbors: 5,
            cuisine_mismatch_penalty: 1.0,
            min_prior_variance: 0.05,
            dow_shared_prior_variance: 0.25,
            dow_observation_variance: 0.5,
            dow_min_factor: 0.3,
            dow_max_factor: 3.0,
        }
    }
}

/// Configuration for the observation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    /// Floor applied to every rate so quantiles stay defined. Default 0.01
    pub min_rate: f64,
    /// Dispersion at or above which the Poisson limit is used. Default 1e8
    pub poisson_dispersion_threshold: f64,
    /// Trailing zero-day fraction that activates zero inflation. Default 0.40
    pub zero_inflation_threshold: f64,
    /// Window for the zero-day fraction, in days. Default 30
    pub zero_inflation_window_days: i64,
    /// Maximum structural-zero probability. Default 0.9
    pub max_zero_inflation: f64,
    /// Finite dispersion candidates; the Poisson limit is always a candidate.
    pub dispersion_grid: Vec<f64>,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            min_rate: 0.01,
            poisson_dispersion_threshold: 1e8,
            zero_inflation_threshold: 0.40,
            zero_inflation_window_days: 30,
            max_zero_inflation: 0.9,
            dispersion_grid: vec![0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0],
        }
    }
}

/// Configuration for the sequential posterior updater.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Lowest prior weight reached by the decay schedule. Default 0.2
    pub prior_weight_floor: f64,
    /// Days over which the prior weight decays to the floor. Default 90
    pub prior_weight_horizon_days: f64,
    /// Observations for a series to leave the warming phase. Default 20
    pub active_min_observations: usize,
    /// Days ahead forecast on each ingest. Default 7
    pub forecast_horizon_days: u32,
    /// Quantile levels emitted per forecast (must include 0.05, 0.5, 0.95)
    pub quantile_levels: Vec<f64>,
    /// Opening hours of a standard trading day, for exposure scaling. Default 12
    pub standard_hours_open: f64,
    /// Trailing window for dispersion selection, in days. Default 56
    pub dispersion_window_days: i64,
    /// Open days required before dispersion is selected from data. Default 7
    pub min_obs_for_dispersion: usize,
    /// Dispersion used until enough data accrues. Default 8.0
    pub default_dispersion: f64,
    /// Days of history before item-level day-of-week deviations are learned.
    /// Default 30
    pub dow_deviation_min_days: i64,
    /// Prior variance of item-level log deviations from the shared pattern.
    /// Must be strictly smaller than `PriorConfig::dow_shared_prior_variance`.
    /// Default 0.05
    pub dow_deviation_prior_variance: f64,
    /// Fraction of pre-drift sufficient statistics retained when priors are
    /// relaxed after drift. Default 0.3
    pub recalibration_forgetting: f64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            prior_weight_floor: 0.2,
            prior_weight_horizon_days: 90.0,
            active_min_observations: 20,
            forecast_horizon_days: 7,
            quantile_levels: DEFAULT_QUANTILE_LEVELS.to_vec(),
            standard_hours_open: 12.0,
            dispersion_window_days: 56,
            min_obs_for_dispersion: 7,
            default_dispersion: 8.0,
            dow_deviation_min_days: 30,
            dow_deviation_prior_variance: 0.05,
            recalibration_forgetting: 0.3,
        }
    }
}

/// Configuration for promotion elasticity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticityConfig {
    /// Probability that a promotion slot is reserved for exploration. Default 0.05
    pub exploration_rate: f64,
    /// Seed mixed into the exploration hash; fixes allocations per deployment.
    pub exploration_seed: u64,
    /// Lowest elasticity mean ever reported. Default -0.2
    pub sign_floor: f64,
    /// Exploration observations needed for full trust in an item estimate. Default 3
    pub full_trust_exploration_count: usize,
    /// Category prior mean for uplift per unit discount. Default 0.0
    pub category_prior_mean: f64,
    /// Category prior variance. Default 25.0
    pub category_prior_variance: f64,
    /// Floor on the per-observation uplift noise variance. Default 1.0
    pub min_uplift_variance: f64,
    /// Flat share of incremental units assumed cannibalised from other items.
    /// Default 0.20
    pub cannibalization_rate: f64,
    /// Seed for Thompson draws; `None` seeds from entropy.
    pub selection_seed: Option<u64>,
}

impl Default for ElasticityConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.05,
            exploration_seed: 0x5eed_f1a5,
            sign_floor: -0.2,
            full_trust_exploration_count: 3,
            category_prior_mean: 0.0,
            category_prior_variance: 25.0,
            min_uplift_variance: 1.0,
            cannibalization_rate: 0.20,
            selection_seed: None,
        }
    }
}

/// Configuration for calibration and drift monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Rolling window of realised outcomes per business. Default 28
    pub window_size: usize,
    /// Outcomes required before calibration metrics are judged. Default 7
    pub min_samples: usize,
    /// Target coverage of the 90% interval. Default 0.90
    pub coverage_target: f64,
    /// Tolerated deviation from the coverage target. Default 0.05
    pub coverage_tolerance: f64,
    /// WAPE above which the business is degraded. Default 0.5
    pub wape_threshold: f64,
    /// CUSUM reference value k, in standard deviations. Default 0.5
    pub cusum_slack: f64,
    /// CUSUM control limit h. Default 5.0
    pub cusum_limit: f64,
    /// Forecast/actual ratio below which chronic underforecast is flagged. Default 0.8
    pub forecast_ratio_low: f64,
    /// Forecast/actual ratio above which chronic overforecast is flagged. Default 1.25
    pub forecast_ratio_high: f64,
    /// Mean relative weekend residual that flags underforecast. Default 0.15
    pub weekend_residual_threshold: f64,
    /// Share of stockout days in the window that flags censoring bias. Default 0.15
    pub stockout_share_threshold: f64,
    /// Forecast velocity (units/day) above which a zero-sale available day is
    /// treated as a suspected unflagged stockout. Default 3.0
    pub high_velocity_threshold: f64,
    /// Coverage below which young series are flagged overconfident. Default 0.8
    pub new_item_coverage_floor: f64,
    /// Young-series outcomes required for the overconfidence check. Default 5
    pub new_item_min_samples: usize,
    /// Alerts retained in history. Default 1000
    pub max_alerts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 28,
            min_samples: 7,
            coverage_target: 0.90,
            coverage_tolerance: 0.05,
            wape_threshold: 0.5,
            cusum_slack: 0.5,
            cusum_limit: 5.0,
            forecast_ratio_low: 0.8,
            forecast_ratio_high: 1.25,
            weekend_residual_threshold: 0.15,
            stockout_share_threshold: 0.15,
            high_velocity_threshold: 3.0,
            new_item_coverage_floor: 0.8,
            new_item_min_samples: 5,
            max_alerts: 1000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub prior: PriorConfig,
    pub likelihood: LikelihoodConfig,
    pub updater: UpdaterConfig,
    pub elasticity: ElasticityConfig,
    pub monitor: MonitorConfig,
    pub logging: LogConfig,
}

fn check(ok: bool, field: &'static str, value: f64, reason: &'static str) -> std::result::Result<(), ConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            reason,
        })
    }
}

impl EngineConfig {
    /// Parse from a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, or return defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML (used by `forecast_replay --sample-config`).
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::errors::ForecastError::Parse(e.to_string()))
    }

    /// Check every range constraint.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let p = &self.prior;
        check(p.default_prior_mean > 0.0, "prior.default_prior_mean", p.default_prior_mean, "must be > 0")?;
        check(
            p.default_prior_variance > 0.0,
            "prior.default_prior_variance",
            p.default_prior_variance,
            "must be > 0",
        )?;
        check(p.item_prior_max_width > 0.0, "prior.item_prior_max_width", p.item_prior_max_width, "must be > 0")?;
        check(p.min_prior_variance > 0.0, "prior.min_prior_variance", p.min_prior_variance, "must be > 0")?;
        check(
            p.archetype_neighbors >= 1,
            "prior.archetype_neighbors",
            p.archetype_neighbors as f64,
            "must be >= 1",
        )?;
        check(
            p.dow_min_factor > 0.0 && p.dow_min_factor < p.dow_max_factor,
            "prior.dow_min_factor",
            p.dow_min_factor,
            "must be in (0, dow_max_factor)",
        )?;
        check(
            p.dow_shared_prior_variance > 0.0,
            "prior.dow_shared_prior_variance",
            p.dow_shared_prior_variance,
            "must be > 0",
        )?;
        check(
            p.dow_observation_variance > 0.0,
            "prior.dow_observation_variance",
            p.dow_observation_variance,
            "must be > 0",
        )?;

        let l = &self.likelihood;
        check(l.min_rate > 0.0, "likelihood.min_rate", l.min_rate, "must be > 0")?;
        check(
            l.zero_inflation_threshold > 0.0 && l.zero_inflation_threshold < 1.0,
            "likelihood.zero_inflation_threshold",
            l.zero_inflation_threshold,
            "must be in (0, 1)",
        )?;
        check(
            (0.0..1.0).contains(&l.max_zero_inflation),
            "likelihood.max_zero_inflation",
            l.max_zero_inflation,
            "must be in [0, 1)",
        )?;
        for &r in &l.dispersion_grid {
            check(r > 0.0, "likelihood.dispersion_grid", r, "entries must be > 0")?;
        }

        let u = &self.updater;
        check(
            u.prior_weight_floor > 0.0 && u.prior_weight_floor <= 1.0,
            "updater.prior_weight_floor",
            u.prior_weight_floor,
            "must be in (0, 1]",
        )?;
        check(
            u.prior_weight_horizon_days > 0.0,
            "updater.prior_weight_horizon_days",
            u.prior_weight_horizon_days,
            "must be > 0",
        )?;
        check(
            u.forecast_horizon_days >= 1,
            "updater.forecast_horizon_days",
            u.forecast_horizon_days as f64,
            "must be >= 1",
        )?;
        for level in [0.05, 0.5, 0.95] {
            check(
                u.quantile_levels.iter().any(|q| (q - level).abs() < 1e-9),
                "updater.quantile_levels",
                level,
                "must contain 0.05, 0.5 and 0.95",
            )?;
        }
        for &q in &u.quantile_levels {
            check(q > 0.0 && q < 1.0, "updater.quantile_levels", q, "entries must be in (0, 1)")?;
        }
        check(
            u.standard_hours_open > 0.0,
            "updater.standard_hours_open",
            u.standard_hours_open,
            "must be > 0",
        )?;
        check(
            u.dispersion_window_days >= 1,
            "updater.dispersion_window_days",
            u.dispersion_window_days as f64,
            "must be >= 1",
        )?;
        check(
            l.zero_inflation_window_days >= 1,
            "likelihood.zero_inflation_window_days",
            l.zero_inflation_window_days as f64,
            "must be >= 1",
        )?;
        check(u.default_dispersion > 0.0, "updater.default_dispersion", u.default_dispersion, "must be > 0")?;
        check(
            u.dow_deviation_prior_variance > 0.0
                && u.dow_deviation_prior_variance < p.dow_shared_prior_variance,
            "updater.dow_deviation_prior_variance",
            u.dow_deviation_prior_variance,
            "must be > 0 and strictly below prior.dow_shared_prior_variance",
        )?;
        check(
            (0.0..=1.0).contains(&u.recalibration_forgetting),
            "updater.recalibration_forgetting",
            u.recalibration_forgetting,
            "must be in [0, 1]",
        )?;

        let e = &self.elasticity;
        check(
            (0.0..=1.0).contains(&e.exploration_rate),
            "elasticity.exploration_rate",
            e.exploration_rate,
            "must be in [0, 1]",
        )?;
        check(e.sign_floor.is_finite(), "elasticity.sign_floor", e.sign_floor, "must be finite")?;
        check(
            e.full_trust_exploration_count >= 1,
            "elasticity.full_trust_exploration_count",
            e.full_trust_exploration_count as f64,
            "must be >= 1",
        )?;
        check(
            e.category_prior_variance > 0.0,
            "elasticity.category_prior_variance",
            e.category_prior_variance,
            "must be > 0",
        )?;
        check(
            e.min_uplift_variance > 0.0,
            "elasticity.min_uplift_variance",
            e.min_uplift_variance,
            "must be > 0",
        )?;
        check(
            (0.0..1.0).contains(&e.cannibalization_rate),
            "elasticity.cannibalization_rate",
            e.cannibalization_rate,
            "must be in [0, 1)",
        )?;

        let m = &self.monitor;
        check(m.window_size >= 1, "monitor.window_size", m.window_size as f64, "must be >= 1")?;
        check(
            m.coverage_target > 0.0 && m.coverage_target < 1.0,
            "monitor.coverage_target",
            m.coverage_target,
            "must be in (0, 1)",
        )?;
        check(m.cusum_limit > 0.0, "monitor.cusum_limit", m.cusum_limit, "must be > 0")?;
        check(
            m.forecast_ratio_low < m.forecast_ratio_high,
            "monitor.forecast_ratio_low",
            m.forecast_ratio_low,
            "must be below forecast_ratio_high",
        )?;
        Ok(())
    }
}
