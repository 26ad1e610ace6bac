//! Engine facade: wires the hierarchy, updater, elasticity estimator and
//! calibration monitor behind per-series locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use super::elasticity::{ElasticityEstimator, ElasticityPosterior, PromotionDecision, PromotionEconomics, PromotionObservation};
use super::infra::sync::{lock, read, write};
use super::infra::targets;
use super::likelihood::DemandLikelihoodModel;
use super::monitoring::{Alert, CalibrationMonitor, DailyRollup, DriftDetectedSignal, MonitorState, OutcomeSample};
use super::prior::{ItemSummary, PriorHierarchy, RefreshReport};
use super::updater::{ForecastDistribution, IngestOutcome, PosteriorState, SequentialPosteriorUpdater};
use crate::errors::{ForecastError, ValidationError};
use crate::prelude::Result;
use crate::types::{BusinessProfile, DayRecord, ItemSeries, ObservationBatch, SeriesKey};

/// Everything owned by one series. Guarded by its own mutex so unrelated
/// series never contend.
#[derive(Debug, Default)]
struct SeriesSlot {
    state: Option<PosteriorState>,
    series: ItemSeries,
    /// Latest forecast per target date, awaiting its actual
    pending: BTreeMap<NaiveDate, ForecastDistribution>,
}

/// A record rejected from a batch, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub item_id: String,
    pub reason: String,
}

/// Outcome of one observation batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub business_id: String,
    pub date: Option<NaiveDate>,
    pub accepted: usize,
    pub rejections: Vec<Rejection>,
    pub forecasts: Vec<ForecastDistribution>,
    /// Set when an outcome in this batch pushed the business into drift
    pub drift: Option<DriftDetectedSignal>,
}

/// Thread-safe forecasting engine.
///
/// Series are independent: each `(business, item)` has its own lock and
/// every [`ingest`](Self::ingest) computes the next state before committing
/// anything. Population refreshes publish a new immutable snapshot that
/// in-flight ingests never see half-written.
#[derive(Debug)]
pub struct ForecastEngine {
    config: EngineConfig,
    hierarchy: PriorHierarchy,
    updater: SequentialPosteriorUpdater,
    elasticity: ElasticityEstimator,
    monitor: CalibrationMonitor,
    slots: RwLock<HashMap<SeriesKey, Arc<Mutex<SeriesSlot>>>>,
}

impl ForecastEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let likelihood = DemandLikelihoodModel::new(config.likelihood.clone());
        let updater = SequentialPosteriorUpdater::new(config.updater.clone(), config.prior.clone(), likelihood);
        info!(
            target: targets::ENGINE,
            prior_weight_floor = config.updater.prior_weight_floor,
            horizon_days = config.updater.prior_weight_horizon_days,
            exploration_rate = config.elasticity.exploration_rate,
            "forecast engine initialised"
        );
        Ok(Self {
            hierarchy: PriorHierarchy::new(config.prior.clone()),
            elasticity: ElasticityEstimator::new(config.elasticity.clone()),
            monitor: CalibrationMonitor::new(config.monitor.clone()),
            updater,
            slots: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &PriorHierarchy {
        &self.hierarchy
    }

    pub fn updater(&self) -> &SequentialPosteriorUpdater {
        &self.updater
    }

    pub fn elasticity(&self) -> &ElasticityEstimator {
        &self.elasticity
    }

    pub fn monitor(&self) -> &CalibrationMonitor {
        &self.monitor
    }

    pub fn register_business(&self, profile: BusinessProfile) {
        self.hierarchy.register_business(profile);
    }

    /// Register an item under a category. Re-registering keeps its history.
    pub fn register_item(&self, key: SeriesKey, category: impl Into<String>) {
        self.hierarchy.register_item(key.clone(), category);
        write(&self.slots).entry(key).or_default();
    }

    fn slot(&self, key: &SeriesKey) -> Result<Arc<Mutex<SeriesSlot>>> {
        read(&self.slots).get(key).cloned().ok_or_else(|| {
            ValidationError::UnknownItem {
                business_id: key.business_id.clone(),
                item_id: key.item_id.clone(),
            }
            .into()
        })
    }

    /// Ingest one validated day for a series.
    pub fn ingest(&self, key: &SeriesKey, record: &DayRecord) -> Result<IngestOutcome> {
        self.ingest_inner(key, record).map(|(outcome, _)| outcome)
    }

    fn ingest_inner(&self, key: &SeriesKey, record: &DayRecord) -> Result<(IngestOutcome, Option<DriftDetectedSignal>)> {
        let slot = self.slot(key)?;
        let mut slot = lock(&slot);
        slot.series.check_append(&key.item_id, record)?;

        let outcome = self
            .updater
            .ingest(&self.hierarchy, key, slot.state.as_ref(), &slot.series, record)
            .map_err(|e| {
                if let ForecastError::NumericDegeneracy { quantity, value } = &e {
                    warn!(
                        target: targets::ENGINE,
                        series = %key,
                        quantity = *quantity,
                        value = *value,
                        "update rejected, previous state retained"
                    );
                }
                e
            })?;

        // Commit. The hierarchy is the only fallible step and goes first;
        // the append was checked above under the same lock.
        let state = &outcome.state;
        self.hierarchy.record_item_posterior(
            key,
            state.mean(),
            state.variance(),
            state.observations,
            state.elapsed_days(),
        )?;
        slot.series.append(&key.item_id, *record)?;
        let acted = slot.pending.remove(&record.date);
        slot.pending.retain(|date, _| *date > record.date);
        for forecast in &outcome.forecasts {
            slot.pending.insert(forecast.target_date, forecast.clone());
        }
        slot.state = Some(outcome.state.clone());
        drop(slot);

        let drift = match acted {
            Some(forecast) if record.is_open() => {
                let sample = OutcomeSample::from_forecast(&forecast, record, self.hierarchy.category_of(key));
                self.monitor.record_outcome(&key.business_id, sample)
            }
            _ => None,
        };
        Ok((outcome, drift))
    }

    /// Validate and ingest a business's batch. Bad records are rejected
    /// individually; the rest of the batch continues.
    pub fn ingest_batch(&self, batch: &ObservationBatch) -> BatchReport {
        let mut report = BatchReport {
            business_id: batch.business_id.clone(),
            date: batch.date,
            accepted: 0,
            rejections: Vec::new(),
            forecasts: Vec::new(),
            drift: None,
        };
        let known_business = self.hierarchy.is_business_registered(&batch.business_id)
            || !self.hierarchy.items_of(&batch.business_id).is_empty();

        for raw in &batch.records {
            let result = if known_business {
                raw.validate(batch.date)
                    .map_err(ForecastError::from)
                    .and_then(|record| self.ingest_inner(&SeriesKey::new(batch.business_id.clone(), raw.item_id.clone()), &record))
            } else {
                Err(ValidationError::UnknownBusiness(batch.business_id.clone()).into())
            };
            match result {
                Ok((outcome, drift)) => {
                    report.accepted += 1;
                    report.forecasts.extend(outcome.forecasts);
                    if report.drift.is_none() {
                        report.drift = drift;
                    }
                }
                Err(e) => {
                    debug!(
                        target: targets::ENGINE,
                        business_id = %batch.business_id,
                        item_id = %raw.item_id,
                        error = %e,
                        "record rejected"
                    );
                    report.rejections.push(Rejection {
                        item_id: raw.item_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if !report.rejections.is_empty() {
            warn!(
                target: targets::ENGINE,
                business_id = %batch.business_id,
                accepted = report.accepted,
                rejected = report.rejections.len(),
                "batch had rejected records"
            );
        }
        report
    }

    /// Ingest many batches. Businesses run in parallel; a business's own
    /// batches keep their relative order. Reports come back in input order.
    pub fn ingest_batches(&self, batches: &[ObservationBatch]) -> Vec<BatchReport> {
        let mut by_business: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, batch) in batches.iter().enumerate() {
            by_business.entry(batch.business_id.as_str()).or_default().push(idx);
        }
        let groups: Vec<Vec<usize>> = by_business.into_values().collect();
        let mut reports: Vec<(usize, BatchReport)> = groups
            .par_iter()
            .flat_map_iter(|indices| {
                indices
                    .iter()
                    .map(|&idx| (idx, self.ingest_batch(&batches[idx])))
                    .collect::<Vec<_>>()
            })
            .collect();
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, r)| r).collect()
    }

    /// Correct the stockout flag of a recorded day and deterministically
    /// replay the series. Returns `None` if the flag was already correct.
    ///
    /// Replay recomputes the posterior from observations alone; a drift
    /// relaxation applied earlier is re-applied once at the end. The
    /// revision continues from the replaced state, so every replayed
    /// forecast carries a version above any it supersedes.
    pub fn correct_availability(&self, key: &SeriesKey, date: NaiveDate, was_available: bool) -> Result<Option<IngestOutcome>> {
        let slot = self.slot(key)?;
        let mut slot = lock(&slot);
        let mut corrected = slot.series.clone();
        if !corrected.correct_availability(&key.item_id, date, was_available)? {
            return Ok(None);
        }

        self.hierarchy.clear_item_posterior(key);
        let replayed = self.replay(key, &corrected, slot.state.as_ref());
        let outcome = match replayed {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(previous) = &slot.state {
                    self.hierarchy.record_item_posterior(
                        key,
                        previous.mean(),
                        previous.variance(),
                        previous.observations,
                        previous.elapsed_days(),
                    )?;
                }
                return Err(e);
            }
        };

        let state = &outcome.state;
        self.hierarchy.record_item_posterior(
            key,
            state.mean(),
            state.variance(),
            state.observations,
            state.elapsed_days(),
        )?;
        slot.series = corrected;
        slot.state = Some(outcome.state.clone());
        slot.pending = outcome
            .forecasts
            .iter()
            .map(|f| (f.target_date, f.clone()))
            .collect();
        info!(
            target: targets::ENGINE,
            series = %key,
            date = %date,
            was_available = was_available,
            replayed_days = slot.series.len(),
            "availability corrected, series replayed"
        );
        Ok(Some(outcome))
    }

    fn replay(&self, key: &SeriesKey, series: &ItemSeries, previous: Option<&PosteriorState>) -> Result<IngestOutcome> {
        let mut history = ItemSeries::new();
        let mut state: Option<PosteriorState> = None;
        for record in series.records() {
            let outcome = self.updater.ingest(&self.hierarchy, key, state.as_ref(), &history, record)?;
            history.append(&key.item_id, *record)?;
            state = Some(outcome.state);
        }
        let mut state = state.ok_or_else(|| ValidationError::NoSuchDay {
            item_id: key.item_id.clone(),
            date: NaiveDate::MIN,
        })?;
        if let Some(previous) = previous {
            state.revision += previous.revision;
            if previous.relaxation_days > 0.0 {
                self.updater.accelerate_relaxation(&mut state)?;
            }
        }
        let forecasts = self.forecasts_for(key, &state, &history)?;
        Ok(IngestOutcome { state, forecasts })
    }

    fn forecasts_for(&self, key: &SeriesKey, state: &PosteriorState, series: &ItemSeries) -> Result<Vec<ForecastDistribution>> {
        match state.last_date {
            Some(last) => {
                let shared = self.hierarchy.dow_factors(key);
                self.updater.forecast(state, &shared, series.records(), last)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Recompute population priors from every series' history.
    pub fn refresh_population_priors(&self) -> RefreshReport {
        let slots: Vec<(SeriesKey, Arc<Mutex<SeriesSlot>>)> = read(&self.slots)
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        let standard_hours = self.config.updater.standard_hours_open;
        let summaries: Vec<ItemSummary> = slots
            .par_iter()
            .filter_map(|(key, slot)| {
                let category = self.hierarchy.category_of(key)?;
                let slot = lock(slot);
                ItemSummary::from_series(key.clone(), category, &slot.series, standard_hours)
            })
            .collect();
        self.hierarchy.refresh_population_priors(&summaries)
    }

    pub fn allocate_exploration(&self, key: &SeriesKey, date: NaiveDate) -> bool {
        self.elasticity.allocate_exploration(key, date)
    }

    pub fn record_promotion(&self, observation: &PromotionObservation) -> Result<ElasticityPosterior> {
        let key = SeriesKey::new(observation.business_id.clone(), observation.item_id.clone());
        if !self.hierarchy.is_item_registered(&key) {
            return Err(ValidationError::UnknownItem {
                business_id: key.business_id,
                item_id: key.item_id,
            }
            .into());
        }
        self.elasticity.record_observation(observation)
    }

    pub fn estimate_elasticity(&self, key: &SeriesKey) -> Result<ElasticityPosterior> {
        self.elasticity.estimate(key)
    }

    pub fn select_promotion(
        &self,
        key: &SeriesKey,
        candidates: &[f64],
        economics: &PromotionEconomics,
    ) -> Result<PromotionDecision> {
        self.elasticity.select_promotion(key, candidates, economics)
    }

    /// Daily calibration rollup for a business. A business in drift has
    /// its priors relaxed and moves to `Recalibrating`.
    pub fn daily_rollup(&self, business_id: &str, date: NaiveDate) -> Result<DailyRollup> {
        let elasticities: Vec<ElasticityPosterior> = self
            .elasticity
            .estimates()
            .into_iter()
            .filter(|(k, _)| k.business_id == business_id)
            .map(|(_, e)| e)
            .collect();
        let rollup = self.monitor.daily_rollup(business_id, date, &elasticities);
        if self.monitor.state(business_id) == MonitorState::DriftDetected {
            let relaxed = self.relax_business(business_id);
            self.monitor.mark_recalibrating(business_id);
            info!(
                target: targets::ENGINE,
                business_id = business_id,
                series = relaxed,
                "priors relaxed after drift"
            );
        }
        Ok(rollup)
    }

    /// Accelerate the prior-weight schedule for every series of a business.
    /// A series whose relaxation fails keeps its state and is skipped, so
    /// each series is discounted at most once per drift episode.
    fn relax_business(&self, business_id: &str) -> usize {
        let mut relaxed = 0;
        for key in self.hierarchy.items_of(business_id) {
            let Ok(slot) = self.slot(&key) else {
                continue;
            };
            match self.relax_series(&key, &mut lock(&slot)) {
                Ok(true) => relaxed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    target: targets::ENGINE,
                    series = %key,
                    error = %e,
                    "relaxation failed, previous state retained"
                ),
            };
        }
        relaxed
    }

    fn relax_series(&self, key: &SeriesKey, slot: &mut SeriesSlot) -> Result<bool> {
        let Some(current) = slot.state.as_ref() else {
            return Ok(false);
        };
        let mut state = current.clone();
        self.updater.accelerate_relaxation(&mut state)?;
        let forecasts = self.forecasts_for(key, &state, &slot.series)?;
        self.hierarchy.record_item_posterior(
            key,
            state.mean(),
            state.variance(),
            state.observations,
            state.elapsed_days(),
        )?;
        for forecast in forecasts {
            slot.pending.insert(forecast.target_date, forecast);
        }
        slot.state = Some(state);
        Ok(true)
    }

    pub fn state(&self, key: &SeriesKey) -> Option<PosteriorState> {
        let slot = self.slot(key).ok()?;
        let slot = lock(&slot);
        slot.state.clone()
    }

    pub fn series(&self, key: &SeriesKey) -> Option<ItemSeries> {
        let slot = self.slot(key).ok()?;
        let slot = lock(&slot);
        Some(slot.series.clone())
    }

    /// Latest forecast per upcoming target date, in date order.
    pub fn latest_forecasts(&self, key: &SeriesKey) -> Vec<ForecastDistribution> {
        match self.slot(key) {
            Ok(slot) => lock(&slot).pending.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.monitor.alerter().alerts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BusinessFeatures, ObservationRecord};
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn engine() -> ForecastEngine {
        let engine = ForecastEngine::new(EngineConfig::default()).unwrap();
        engine.register_business(BusinessProfile::new("b1", BusinessFeatures::default()));
        engine.register_item(SeriesKey::new("b1", "pizza"), "mains");
        engine.register_item(SeriesKey::new("b1", "salad"), "sides");
        engine
    }

    fn batch(business: &str, date: NaiveDate, records: Vec<ObservationRecord>) -> ObservationBatch {
        ObservationBatch {
            business_id: business.into(),
            date: Some(date),
            records,
        }
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ForecastEngine>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.updater.prior_weight_floor = 1.5;
        assert!(ForecastEngine::new(config).is_err());
    }

    #[test]
    fn test_batch_rejects_per_record() {
        let e = engine();
        let report = e.ingest_batch(&batch(
            "b1",
            start(),
            vec![
                ObservationRecord::new("pizza", 5.0),
                ObservationRecord::new("salad", -1.0),
                ObservationRecord::new("ghost", 2.0),
            ],
        ));
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejections.len(), 2);
        assert_eq!(report.rejections[0].item_id, "salad");
        assert!(report.rejections[1].reason.contains("not registered"));
        assert_eq!(report.forecasts.len(), 7);
        assert!(e.state(&SeriesKey::new("b1", "salad")).is_none());
    }

    #[test]
    fn test_unknown_business_rejected() {
        let e = engine();
        let report = e.ingest_batch(&batch("nobody", start(), vec![ObservationRecord::new("pizza", 5.0)]));
        assert_eq!(report.accepted, 0);
        assert!(report.rejections[0].reason.contains("unknown business"));
    }

    #[test]
    fn test_failed_ingest_leaves_state_untouched() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        e.ingest(&key, &DayRecord::new(start(), 5.0)).unwrap();
        let before = e.state(&key).unwrap();
        assert!(e.ingest(&key, &DayRecord::new(start(), 6.0)).is_err());
        assert_eq!(e.state(&key).unwrap(), before);
        assert_eq!(e.series(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_pending_forecasts_roll_forward() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        for d in 0..3 {
            e.ingest(&key, &DayRecord::new(start() + Duration::days(d), 5.0)).unwrap();
        }
        let pending = e.latest_forecasts(&key);
        assert_eq!(pending.len(), 7);
        assert_eq!(pending[0].target_date, start() + Duration::days(3));
        assert_eq!(pending[0].version, 3);
        // Two realised outcomes reached the monitor
        assert_eq!(e.monitor().metrics("b1").samples, 2);
    }

    #[test]
    fn test_batches_across_businesses_keep_order() {
        let e = engine();
        e.register_business(BusinessProfile::new("b2", BusinessFeatures::default()));
        e.register_item(SeriesKey::new("b2", "pizza"), "mains");
        let mut batches = Vec::new();
        for d in 0..10 {
            for b in ["b1", "b2"] {
                batches.push(batch(b, start() + Duration::days(d), vec![ObservationRecord::new("pizza", 4.0)]));
            }
        }
        let reports = e.ingest_batches(&batches);
        assert_eq!(reports.len(), 20);
        assert!(reports.iter().all(|r| r.rejections.is_empty()));
        assert_eq!(reports[1].business_id, "b2");
        assert_eq!(e.series(&SeriesKey::new("b2", "pizza")).unwrap().len(), 10);
    }

    #[test]
    fn test_availability_correction_replays_deterministically() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        for d in 0..10 {
            e.ingest(&key, &DayRecord::new(start() + Duration::days(d), 6.0)).unwrap();
        }
        let original = e.state(&key).unwrap();
        let target = start() + Duration::days(4);

        assert!(e.correct_availability(&key, target, true).unwrap().is_none());
        let corrected = e.correct_availability(&key, target, false).unwrap().unwrap();
        assert!(corrected.state.mean() >= original.mean());
        assert_eq!(corrected.state.stats.censored_days, 1);
        assert!(!e.series(&key).unwrap().records()[4].was_available);

        // Undoing the correction restores the original posterior
        let restored = e.correct_availability(&key, target, true).unwrap().unwrap();
        assert!((restored.state.mean() - original.mean()).abs() < 1e-9);
        assert_eq!(restored.state.stats, original.stats);
    }

    #[test]
    fn test_correct_unknown_day_rejected() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        e.ingest(&key, &DayRecord::new(start(), 6.0)).unwrap();
        let err = e.correct_availability(&key, start() + Duration::days(9), false).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_promotion_requires_registered_item() {
        let e = engine();
        let obs = PromotionObservation {
            business_id: "b1".into(),
            item_id: "ghost".into(),
            category: "mains".into(),
            date: start(),
            discount_fraction: 0.2,
            was_exploration: true,
            baseline_forecast: 10.0,
            observed_quantity: 12.0,
        };
        assert!(e.record_promotion(&obs).is_err());
        let ok = PromotionObservation {
            item_id: "pizza".into(),
            ..obs
        };
        let posterior = e.record_promotion(&ok).unwrap();
        assert_eq!(posterior.exploration_count, 1);
        assert_eq!(e.estimate_elasticity(&SeriesKey::new("b1", "pizza")).unwrap(), posterior);
    }

    #[test]
    fn test_drift_rollup_relaxes_priors() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        // A stable regime, then demand quadruples
        let mut date = start();
        for _ in 0..30 {
            e.ingest(&key, &DayRecord::new(date, 5.0)).unwrap();
            date += Duration::days(1);
        }
        let before = e.state(&key).unwrap();
        assert!(before.prior_weight > 0.2);
        for _ in 0..10 {
            e.ingest(&key, &DayRecord::new(date, 20.0)).unwrap();
            date += Duration::days(1);
        }
        assert_eq!(e.monitor().state("b1"), MonitorState::DriftDetected);
        let rollup = e.daily_rollup("b1", date - Duration::days(1)).unwrap();
        assert_eq!(rollup.record.state, MonitorState::DriftDetected);
        assert_eq!(e.monitor().state("b1"), MonitorState::Recalibrating);
        let after = e.state(&key).unwrap();
        assert_eq!(after.prior_weight, 0.2);
        assert!(after.relaxation_days > 0.0);
    }

    /// Make the next blend for `key` produce a negative variance.
    fn poison_prior(e: &ForecastEngine, key: &SeriesKey) {
        let slot = e.slot(key).unwrap();
        lock(&slot).state.as_mut().unwrap().prior.variance = -1e6;
    }

    #[test]
    fn test_correction_issues_newer_versions() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        for d in 0..10 {
            e.ingest(&key, &DayRecord::new(start() + Duration::days(d), 6.0)).unwrap();
        }
        let before = e.latest_forecasts(&key);
        let old_version = before[0].version;
        assert_eq!(old_version, 10);

        let corrected = e
            .correct_availability(&key, start() + Duration::days(4), false)
            .unwrap()
            .unwrap();
        assert!(corrected.state.revision > old_version);
        let after = e.latest_forecasts(&key);
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.target_date, new.target_date);
            assert!(new.version > old.version);
            assert_eq!(new.version, corrected.state.revision);
        }

        // A second correction keeps counting upward
        let restored = e
            .correct_availability(&key, start() + Duration::days(4), true)
            .unwrap()
            .unwrap();
        assert!(restored.state.revision > corrected.state.revision);
    }

    #[test]
    fn test_degenerate_update_keeps_previous_posterior() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        for d in 0..5 {
            e.ingest(&key, &DayRecord::new(start() + Duration::days(d), 6.0)).unwrap();
        }
        poison_prior(&e, &key);
        let state = e.state(&key).unwrap();
        let forecasts = e.latest_forecasts(&key);
        let samples = e.monitor().metrics("b1").samples;

        let err = e
            .ingest(&key, &DayRecord::new(start() + Duration::days(5), 6.0))
            .unwrap_err();
        assert!(matches!(err, ForecastError::NumericDegeneracy { .. }));
        assert_eq!(e.state(&key).unwrap(), state);
        assert_eq!(e.latest_forecasts(&key), forecasts);
        assert_eq!(e.series(&key).unwrap().len(), 5);
        assert_eq!(e.monitor().metrics("b1").samples, samples);
    }

    #[test]
    fn test_concurrent_ingest_on_one_series_is_serialised() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        let accepted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for d in 0..60 {
                        let record = DayRecord::new(start() + Duration::days(d), 5.0);
                        if e.ingest(&key, &record).is_ok() {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        let accepted = accepted.load(Ordering::SeqCst);
        let series = e.series(&key).unwrap();
        let state = e.state(&key).unwrap();
        assert!(accepted > 0);
        assert_eq!(state.last_date, Some(start() + Duration::days(59)));
        assert_eq!(series.len(), accepted);
        assert_eq!(state.revision, accepted as u64);
        assert_eq!(state.recorded_days, accepted);
        assert!(series.records().windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_hierarchy_failure_commits_nothing() {
        let e = engine();
        // A slot the hierarchy has never heard of
        let key = SeriesKey::new("b1", "ghost");
        write(&e.slots).insert(key.clone(), Arc::default());

        assert!(e.ingest(&key, &DayRecord::new(start(), 5.0)).is_err());
        assert!(e.state(&key).is_none());
        assert!(e.series(&key).unwrap().is_empty());
        assert!(e.latest_forecasts(&key).is_empty());
    }

    #[test]
    fn test_failed_relaxation_skips_series_and_discounts_once() {
        let e = engine();
        let pizza = SeriesKey::new("b1", "pizza");
        let salad = SeriesKey::new("b1", "salad");
        let mut date = start();
        for _ in 0..30 {
            e.ingest(&pizza, &DayRecord::new(date, 5.0)).unwrap();
            date += Duration::days(1);
        }
        for _ in 0..10 {
            e.ingest(&pizza, &DayRecord::new(date, 20.0)).unwrap();
            date += Duration::days(1);
        }
        for d in 0..3 {
            e.ingest(&salad, &DayRecord::new(start() + Duration::days(d), 5.0)).unwrap();
        }
        assert_eq!(e.monitor().state("b1"), MonitorState::DriftDetected);

        poison_prior(&e, &pizza);
        let pizza_before = e.state(&pizza).unwrap();
        let salad_before = e.state(&salad).unwrap();
        let today = date - Duration::days(1);

        e.daily_rollup("b1", today).unwrap();
        assert_eq!(e.monitor().state("b1"), MonitorState::Recalibrating);
        assert_eq!(e.state(&pizza).unwrap(), pizza_before);
        let salad_after = e.state(&salad).unwrap();
        let mut expected = salad_before.stats;
        expected.discount(e.config().updater.recalibration_forgetting);
        assert_eq!(salad_after.stats, expected);
        assert!(salad_after.relaxation_days > 0.0);

        // The next rollup leaves the salad alone
        e.daily_rollup("b1", today + Duration::days(1)).unwrap();
        assert_eq!(e.state(&salad).unwrap().stats, expected);
    }

    #[test]
    fn test_forecasts_carry_upper_tail() {
        let e = engine();
        let key = SeriesKey::new("b1", "pizza");
        for d in 0..14 {
            e.ingest(&key, &DayRecord::new(start() + Duration::days(d), 8.0)).unwrap();
        }
        for f in e.latest_forecasts(&key) {
            assert_eq!(f.quantiles.len(), 8);
            let q99 = f.q99().unwrap();
            assert!(q99 >= f.q95());
            assert!(f.is_monotone());
        }
    }
}
