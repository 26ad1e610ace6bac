//! Sequential posterior updater.
//!
//! One (business, item) series advances one day at a time:
//!
//! 1. fetch the current [`PosteriorState`], or seed it from the hierarchy
//! 2. fold the day into exposure-weighted sufficient statistics
//!    (deseasonalised; stockout days contribute `E[Y | Y >= y]`)
//! 3. re-select the count model and dispersion over the trailing window
//! 4. blend the data estimate with the population prior using the
//!    prior-weight schedule
//! 5. emit forecasts for the configured horizon from the blended posterior
//!
//! [`SequentialPosteriorUpdater::ingest`] is pure with respect to its
//! inputs: it returns the next state and forecasts and the caller commits
//! both, so a failed update leaves nothing behind.

mod forecast;
mod seasonality;
mod state;

pub use forecast::{confidence_score, explanation, ForecastDistribution, QuantilePoint};
pub use seasonality::{DeviationLearner, DowResiduals, SeasonalityModel};
pub use state::{DataStats, Phase, PosteriorState};

use chrono::{Duration, NaiveDate, Utc};
use tracing::debug;
use uuid::Uuid;

use super::config::{PriorConfig, UpdaterConfig};
use super::infra::targets;
use super::likelihood::{CountObservation, DemandLikelihoodModel};
use super::prior::{PopulationPriors, PriorHierarchy, PriorLevel, PriorNode};
use crate::errors::{ForecastError, ValidationError};
use crate::prelude::Result;
use crate::types::{weekday_index, DayRecord, ItemSeries, SeriesKey};

/// Result of one successful ingest.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub state: PosteriorState,
    pub forecasts: Vec<ForecastDistribution>,
}

/// Per-series Bayesian updater; stateless apart from configuration.
#[derive(Debug, Clone)]
pub struct SequentialPosteriorUpdater {
    config: UpdaterConfig,
    prior_config: PriorConfig,
    likelihood: DemandLikelihoodModel,
}

fn degenerate(quantity: &'static str, value: f64) -> ForecastError {
    ForecastError::NumericDegeneracy { quantity, value }
}

fn check_positive(quantity: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(degenerate(quantity, value))
    }
}

impl SequentialPosteriorUpdater {
    pub fn new(config: UpdaterConfig, prior_config: PriorConfig, likelihood: DemandLikelihoodModel) -> Self {
        Self {
            config,
            prior_config,
            likelihood,
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn likelihood(&self) -> &DemandLikelihoodModel {
        &self.likelihood
    }

    /// Prior weight after `t` schedule days:
    /// `max(floor, 1 - (1 - floor) t / horizon)`.
    pub fn prior_weight_at(&self, t: f64) -> f64 {
        let floor = self.config.prior_weight_floor;
        (1.0 - (1.0 - floor) * t.max(0.0) / self.config.prior_weight_horizon_days).max(floor)
    }

    /// Phase from folded observations. Closed days are recorded but never
    /// folded, so a series whose only days were closed stays `Cold`.
    fn phase_for(&self, observations: usize, prior_weight: f64) -> Phase {
        if observations == 0 {
            Phase::Cold
        } else if observations < self.config.active_min_observations {
            Phase::Warming
        } else if prior_weight <= self.config.prior_weight_floor {
            Phase::Mature
        } else {
            Phase::Active
        }
    }

    fn deviation_learner(&self) -> DeviationLearner {
        DeviationLearner {
            min_days: self.config.dow_deviation_min_days,
            prior_variance: self.config.dow_deviation_prior_variance,
            observation_variance: self.prior_config.dow_observation_variance,
        }
    }

    fn seasonal_factor(&self, model: &SeasonalityModel, shared: &[f64; 7], dow: usize) -> f64 {
        model.factor(
            shared,
            dow,
            self.prior_config.dow_min_factor,
            self.prior_config.dow_max_factor,
        )
    }

    fn exposure(&self, record: &DayRecord) -> f64 {
        record.hours_open / self.config.standard_hours_open
    }

    /// Seed a state from the most specific available prior, falling back
    /// to the configured default.
    pub fn init_state(&self, hierarchy: &PriorHierarchy, key: &SeriesKey) -> Result<PosteriorState> {
        let prior = match hierarchy.get_prior(&key.business_id, &key.item_id) {
            Ok(node) => node,
            Err(ForecastError::PriorUnavailable { .. }) => {
                debug!(target: targets::UPDATER, series = %key, "no prior reachable, using default");
                hierarchy.default_prior()
            }
            Err(e) => return Err(e),
        };
        Ok(PosteriorState::cold(key.clone(), prior, self.config.default_dispersion))
    }

    fn blending_target(
        &self,
        hierarchy: &PriorHierarchy,
        snapshot: &PopulationPriors,
        state: &PosteriorState,
    ) -> Result<PriorNode> {
        let key = &state.key;
        match hierarchy.population_prior_in(snapshot, &key.business_id, &key.item_id) {
            Ok(node) => Ok(node),
            Err(ForecastError::PriorUnavailable { .. }) if state.prior.level != PriorLevel::Item => {
                Ok(state.prior.clone())
            }
            Err(ForecastError::PriorUnavailable { .. }) => Ok(hierarchy.default_prior()),
            Err(e) => Err(e),
        }
    }

    /// Blended posterior moments of the deseasonalised rate.
    fn blend(&self, prior: &PriorNode, stats: &DataStats, weight: f64, dispersion: f64) -> Result<(f64, f64)> {
        let prior_mean = self.likelihood.floor_rate(prior.mean);
        let (mean, variance) = match (stats.mean(), stats.variance_of_mean(dispersion)) {
            (Some(m), Some(v)) => (
                weight * prior_mean + (1.0 - weight) * m,
                weight * weight * prior.variance + (1.0 - weight) * (1.0 - weight) * v,
            ),
            _ => (prior_mean, prior.variance),
        };
        let mean = check_positive("posterior mean", self.likelihood.floor_rate(mean))?;
        let variance = check_positive("posterior variance", variance)?;
        Ok((mean, variance))
    }

    /// Fold one day into a copy of `current` and forecast ahead.
    ///
    /// `history` is the series before `record`. On error nothing observable
    /// has changed.
    pub fn ingest(
        &self,
        hierarchy: &PriorHierarchy,
        key: &SeriesKey,
        current: Option<&PosteriorState>,
        history: &ItemSeries,
        record: &DayRecord,
    ) -> Result<IngestOutcome> {
        let mut state = match current {
            Some(s) => s.clone(),
            None => self.init_state(hierarchy, key)?,
        };
        self.validate(&state, record)?;

        let snapshot = hierarchy.snapshot();
        let category = hierarchy.category_of(&state.key);
        let shared = snapshot.dow_factors(category.as_deref());
        let target = self.blending_target(hierarchy, &snapshot, &state)?;

        state.first_date.get_or_insert(record.date);
        state.last_date = Some(record.date);
        state.recorded_days += 1;

        if record.is_open() {
            self.fold(&mut state, &shared, record);
        }

        let schedule_t = state.elapsed_days() as f64 + state.relaxation_days;
        let weight = state.prior_weight.min(self.prior_weight_at(schedule_t));

        // Model selection over the trailing windows
        let (mean, _) = self.blend(&target, &state.stats, weight, state.dispersion)?;
        let window = trailing(history, record, self.config.dispersion_window_days);
        let zero_window = trailing(history, record, self.likelihood.config().zero_inflation_window_days);
        let zero_fraction = self.likelihood.zero_fraction(zero_window.iter());
        let mut count_model = self
            .likelihood
            .select_count_model(zero_fraction, mean, state.dispersion);
        let open: Vec<(CountObservation, f64)> = window
            .iter()
            .filter(|r| r.is_open())
            .map(|r| {
                let factor = self.seasonal_factor(&state.seasonality, &shared, r.dow());
                (CountObservation::from(r), mean * factor * self.exposure(r))
            })
            .collect();
        let dispersion = if open.len() >= self.config.min_obs_for_dispersion {
            let r = self.likelihood.select_dispersion(&open, count_model);
            count_model = self.likelihood.select_count_model(zero_fraction, mean, r);
            r
        } else {
            self.config.default_dispersion
        };
        if dispersion.is_nan() || dispersion <= 0.0 {
            return Err(degenerate("dispersion", dispersion));
        }

        let (mean, variance) = self.blend(&target, &state.stats, weight, dispersion)?;
        state.shape = check_positive("gamma shape", mean * mean / variance)?;
        state.rate = check_positive("gamma rate", mean / variance)?;
        state.dispersion = dispersion;
        state.count_model = count_model;
        state.prior_weight = weight;
        state.seasonality = self
            .deviation_learner()
            .model(&state.dow_residuals, state.elapsed_days());
        state.phase = self.phase_for(state.observations, weight);
        state.low_confidence = target.is_default();
        state.prior = target;
        state.revision += 1;
        state.last_updated = Utc::now();

        let forecasts = self.forecast(&state, &shared, &window, record.date)?;
        debug!(
            target: targets::UPDATER,
            series = %state.key,
            date = %record.date,
            mean = mean,
            prior_weight = weight,
            dispersion = dispersion,
            phase = state.phase.label(),
            "posterior updated"
        );
        Ok(IngestOutcome { state, forecasts })
    }

    fn validate(&self, state: &PosteriorState, record: &DayRecord) -> Result<()> {
        let item_id = state.key.item_id.clone();
        if !record.quantity_sold.is_finite() {
            return Err(ValidationError::NonFiniteQuantity { item_id }.into());
        }
        if record.quantity_sold < 0.0 {
            return Err(ValidationError::NegativeQuantity {
                item_id,
                quantity: record.quantity_sold,
            }
            .into());
        }
        if !(0.0..=24.0).contains(&record.hours_open) {
            return Err(ValidationError::InvalidHoursOpen {
                item_id,
                hours: record.hours_open,
            }
            .into());
        }
        if let Some(last) = state.last_date {
            if record.date <= last {
                return Err(ValidationError::OutOfOrder {
                    item_id,
                    date: record.date,
                    last,
                }
                .into());
            }
        }
        Ok(())
    }

    fn fold(&self, state: &mut PosteriorState, shared: &[f64; 7], record: &DayRecord) {
        let exposure = self.exposure(record);
        let dow = record.dow();
        let offset = self.seasonal_factor(&state.seasonality, shared, dow) * exposure;
        let prior_mean = state.mean();
        let y = if record.is_censored() {
            self.likelihood
                .predictive(prior_mean * offset, state.dispersion, state.count_model)
                .conditional_mean_at_least(record.count())
                .max(record.quantity_sold)
        } else {
            record.quantity_sold
        };
        state.stats.fold(y, offset, record.is_censored());
        state
            .dow_residuals
            .record(dow, y, prior_mean * shared[dow] * exposure);
        state.observations += 1;
    }

    /// Typical exposure for a weekday from the trailing window: the mean
    /// over recorded days with that weekday (closed days count as zero),
    /// else the mean over open days, else a standard day.
    fn typical_exposure(&self, window: &[DayRecord], dow: usize) -> f64 {
        let same: Vec<f64> = window
            .iter()
            .filter(|r| r.dow() == dow)
            .map(|r| self.exposure(r))
            .collect();
        if !same.is_empty() {
            return same.iter().sum::<f64>() / same.len() as f64;
        }
        let open: Vec<f64> = window
            .iter()
            .filter(|r| r.is_open())
            .map(|r| self.exposure(r))
            .collect();
        if open.is_empty() {
            1.0
        } else {
            open.iter().sum::<f64>() / open.len() as f64
        }
    }

    /// Forecast distributions for the configured horizon from `state`.
    pub fn forecast(
        &self,
        state: &PosteriorState,
        shared: &[f64; 7],
        window: &[DayRecord],
        issued_for: NaiveDate,
    ) -> Result<Vec<ForecastDistribution>> {
        let rate_mean = state.mean();
        // Rate uncertainty widens the predictive: 1/r_eff = 1/r + 1/shape
        let inv_r = if self.likelihood.is_poisson(state.dispersion) {
            0.0
        } else {
            1.0 / state.dispersion
        };
        let r_eff = 1.0 / (inv_r + 1.0 / state.shape);
        check_positive("predictive dispersion", r_eff)?;

        let mut levels = self.config.quantile_levels.clone();
        levels.sort_by(|a, b| a.total_cmp(b));
        let recent: Vec<DayRecord> = window
            .iter()
            .filter(|r| (issued_for - r.date).num_days() < 28)
            .copied()
            .collect();

        let generated_at = Utc::now();
        let mut out = Vec::with_capacity(self.config.forecast_horizon_days as usize);
        for h in 1..=self.config.forecast_horizon_days {
            let target_date = issued_for + Duration::days(i64::from(h));
            let dow = weekday_index(target_date);
            let factor = self.seasonal_factor(&state.seasonality, shared, dow);
            let mean = rate_mean * factor * self.typical_exposure(&recent, dow);
            if !mean.is_finite() {
                return Err(degenerate("forecast mean", mean));
            }
            let predictive = self.likelihood.predictive(mean, r_eff, state.count_model);
            let quantiles = predictive
                .quantiles(&levels)
                .into_iter()
                .zip(&levels)
                .map(|(value, &level)| QuantilePoint {
                    level,
                    value: value as f64,
                })
                .collect();
            out.push(ForecastDistribution {
                forecast_id: Uuid::new_v4(),
                version: state.revision,
                business_id: state.key.business_id.clone(),
                item_id: state.key.item_id.clone(),
                issued_for,
                target_date,
                horizon_days: h,
                point_estimate: predictive.mean(),
                variance: predictive.variance(),
                quantiles,
                distribution_family: predictive.family(),
                dispersion: predictive.dispersion(),
                zero_inflation: predictive.zero_inflation(),
                seasonal_factor: factor,
                phase: state.phase,
                prior_source: state.prior_source(),
                prior_weight: state.prior_weight,
                low_confidence: state.low_confidence,
                confidence_score: confidence_score(state.observations),
                explanation: explanation(
                    factor,
                    state.observations,
                    state.prior_source(),
                    state.low_confidence,
                ),
                generated_at,
            });
        }
        Ok(out)
    }

    /// Relax the prior after drift: jump the schedule to the floor and
    /// discount pre-drift sufficient statistics. The prior weight never
    /// rises.
    pub fn accelerate_relaxation(&self, state: &mut PosteriorState) -> Result<()> {
        let horizon = self.config.prior_weight_horizon_days;
        let elapsed = state.elapsed_days() as f64;
        state.relaxation_days = state.relaxation_days.max(horizon - elapsed);

        let mut stats = state.stats;
        stats.discount(self.config.recalibration_forgetting);
        let weight = state.prior_weight.min(self.config.prior_weight_floor);
        let (mean, variance) = self.blend(&state.prior, &stats, weight, state.dispersion)?;
        let shape = check_positive("gamma shape", mean * mean / variance)?;
        let rate = check_positive("gamma rate", mean / variance)?;

        state.stats = stats;
        state.prior_weight = weight;
        state.shape = shape;
        state.rate = rate;
        state.dow_residuals = DowResiduals::default();
        state.phase = self.phase_for(state.observations, weight);
        state.revision += 1;
        state.last_updated = Utc::now();
        debug!(
            target: targets::UPDATER,
            series = %state.key,
            mean = mean,
            "prior relaxed after drift"
        );
        Ok(())
    }
}

/// Records of `history` plus `record` within `days` days ending at
/// `record.date`.
fn trailing(history: &ItemSeries, record: &DayRecord, days: i64) -> Vec<DayRecord> {
    let start = record.date - Duration::days(days - 1);
    let records = history.records();
    let from = records.partition_point(|r| r.date < start);
    let mut window: Vec<DayRecord> = records[from..].to_vec();
    window.push(*record);
    window
}
