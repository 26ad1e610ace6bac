//! Hierarchical prior store.
//!
//! Three nested levels of informative priors over the deseasonalised daily
//! rate: global, category (or archetype), and item. Population levels live
//! in an immutable [`PopulationPriors`] snapshot behind `RwLock<Arc<_>>`;
//! readers clone the `Arc` and never observe a half-updated hierarchy.
//! Item nodes are created lazily from each series' own posterior.
//!
//! # Lookup order
//!
//! [`PriorHierarchy::get_prior`] returns the most specific available node:
//!
//! 1. item, once the series has at least `mature_item_min_observations`
//!    observations over `mature_item_min_days` days and its coefficient of
//!    variation is at most `item_prior_max_width`
//! 2. category
//! 3. archetype, only while the business has no item-level data
//! 4. global
//!
//! With none of these, [`ForecastError::PriorUnavailable`] is returned and
//! callers fall back to [`PriorHierarchy::default_prior`].

mod archetype;
mod node;
mod population;

pub use archetype::feature_distance;
pub use node::{PriorLevel, PriorNode, PriorRef};
pub use population::{BusinessSummary, ItemSummary, PopulationPriors, RefreshReport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use super::config::PriorConfig;
use super::infra::sync::{lock, read, write};
use super::infra::targets;
use crate::errors::{ForecastError, ValidationError};
use crate::prelude::Result;
use crate::types::{BusinessFeatures, BusinessProfile, SeriesKey};

/// Item registration plus its lazily created node.
#[derive(Debug, Clone)]
struct ItemEntry {
    category: String,
    node: Option<PriorNode>,
    observations: usize,
    elapsed_days: i64,
}

/// Items of one business, behind their own lock so commits for different
/// businesses never contend.
#[derive(Debug, Default)]
struct BusinessItems {
    items: HashMap<String, ItemEntry>,
    /// Items with at least one observation
    observed: usize,
}

impl BusinessItems {
    fn set_observations(&mut self, item_id: &str, observations: usize) -> Option<&mut ItemEntry> {
        let entry = self.items.get_mut(item_id)?;
        match (entry.observations > 0, observations > 0) {
            (false, true) => self.observed += 1,
            (true, false) => self.observed -= 1,
            _ => {}
        }
        entry.observations = observations;
        Some(entry)
    }
}

type SharedItems = Arc<RwLock<BusinessItems>>;

/// Shared store of priors and registrations.
#[derive(Debug)]
pub struct PriorHierarchy {
    config: PriorConfig,
    snapshot: RwLock<Arc<PopulationPriors>>,
    /// Registered items, indexed by business
    businesses: RwLock<HashMap<String, SharedItems>>,
    profiles: RwLock<HashMap<String, BusinessProfile>>,
    /// Held for the duration of a population refresh.
    refresh_lock: Mutex<u64>,
}

fn unknown_item(key: &SeriesKey) -> ForecastError {
    ValidationError::UnknownItem {
        business_id: key.business_id.clone(),
        item_id: key.item_id.clone(),
    }
    .into()
}

impl PriorHierarchy {
    pub fn new(config: PriorConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(Arc::new(PopulationPriors::default())),
            businesses: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &PriorConfig {
        &self.config
    }

    /// Register or update a business profile. Re-registering reassigns the
    /// archetype and features.
    pub fn register_business(&self, profile: BusinessProfile) {
        debug!(
            target: targets::PRIOR,
            business = %profile.business_id,
            archetype = ?profile.archetype,
            "business registered"
        );
        write(&self.profiles).insert(profile.business_id.clone(), profile);
    }

    pub fn profile(&self, business_id: &str) -> Option<BusinessProfile> {
        read(&self.profiles).get(business_id).cloned()
    }

    pub fn is_business_registered(&self, business_id: &str) -> bool {
        read(&self.profiles).contains_key(business_id)
    }

    fn business(&self, business_id: &str) -> Option<SharedItems> {
        read(&self.businesses).get(business_id).cloned()
    }

    fn entry(&self, key: &SeriesKey) -> Option<ItemEntry> {
        let business = self.business(&key.business_id)?;
        let items = read(&business);
        items.items.get(&key.item_id).cloned()
    }

    /// Register an item for a business. Re-registering changes the category
    /// and keeps any item-level node.
    pub fn register_item(&self, key: SeriesKey, category: impl Into<String>) {
        let category = category.into();
        let business = Arc::clone(write(&self.businesses).entry(key.business_id).or_default());
        let mut business = write(&business);
        match business.items.get_mut(&key.item_id) {
            Some(entry) => entry.category = category,
            None => {
                business.items.insert(
                    key.item_id,
                    ItemEntry {
                        category,
                        node: None,
                        observations: 0,
                        elapsed_days: 0,
                    },
                );
            }
        }
    }

    pub fn category_of(&self, key: &SeriesKey) -> Option<String> {
        self.entry(key).map(|e| e.category)
    }

    pub fn is_item_registered(&self, key: &SeriesKey) -> bool {
        self.business(&key.business_id)
            .as_ref()
            .is_some_and(|b| read(b).items.contains_key(&key.item_id))
    }

    /// Registered items of one business.
    pub fn items_of(&self, business_id: &str) -> Vec<SeriesKey> {
        let Some(business) = self.business(business_id) else {
            return Vec::new();
        };
        let mut keys: Vec<SeriesKey> = read(&business)
            .items
            .keys()
            .map(|item_id| SeriesKey::new(business_id, item_id.clone()))
            .collect();
        keys.sort();
        keys
    }

    /// Whether any item of the business has been observed.
    pub fn business_has_item_data(&self, business_id: &str) -> bool {
        self.business(business_id).as_ref().is_some_and(|b| read(b).observed > 0)
    }

    /// Publish a series' current rate posterior as its item-level node.
    pub fn record_item_posterior(
        &self,
        key: &SeriesKey,
        mean: f64,
        variance: f64,
        observations: usize,
        elapsed_days: i64,
    ) -> Result<()> {
        let business = self.business(&key.business_id).ok_or_else(|| unknown_item(key))?;
        let mut business = write(&business);
        let entry = business
            .set_observations(&key.item_id, observations)
            .ok_or_else(|| unknown_item(key))?;
        entry.elapsed_days = elapsed_days;
        let node = PriorNode::new(PriorLevel::Item, key.to_string(), mean, variance)
            .with_sample_size(observations as f64)
            .with_parent(PriorLevel::Category, entry.category.clone());
        entry.node = Some(node);
        Ok(())
    }

    /// Drop the item-level node, e.g. before a series is replayed.
    pub fn clear_item_posterior(&self, key: &SeriesKey) {
        let Some(business) = self.business(&key.business_id) else {
            return;
        };
        if let Some(entry) = write(&business).set_observations(&key.item_id, 0) {
            entry.node = None;
            entry.elapsed_days = 0;
        };
    }

    /// Current population snapshot.
    pub fn snapshot(&self) -> Arc<PopulationPriors> {
        Arc::clone(&read(&self.snapshot))
    }

    /// Shared day-of-week factors for an item's category.
    pub fn dow_factors(&self, key: &SeriesKey) -> [f64; 7] {
        let category = self.category_of(key);
        self.snapshot().dow_factors(category.as_deref())
    }

    /// Configured wide fallback prior for a cold platform.
    pub fn default_prior(&self) -> PriorNode {
        PriorNode::new(
            PriorLevel::Default,
            "default",
            self.config.default_prior_mean,
            self.config.default_prior_variance,
        )
    }

    /// Most specific available prior for an item.
    pub fn get_prior(&self, business_id: &str, item_id: &str) -> Result<PriorNode> {
        let snapshot = self.snapshot();
        self.lookup(&snapshot, business_id, item_id, true)
    }

    /// Population-level prior for an item, skipping the item level. This is
    /// the blending target for a series' own data.
    pub fn population_prior(&self, business_id: &str, item_id: &str) -> Result<PriorNode> {
        let snapshot = self.snapshot();
        self.lookup(&snapshot, business_id, item_id, false)
    }

    /// Like [`population_prior`](Self::population_prior) against a caller-held
    /// snapshot, so an ingest sees one consistent hierarchy.
    pub fn population_prior_in(
        &self,
        snapshot: &PopulationPriors,
        business_id: &str,
        item_id: &str,
    ) -> Result<PriorNode> {
        self.lookup(snapshot, business_id, item_id, false)
    }

    fn lookup(
        &self,
        snapshot: &PopulationPriors,
        business_id: &str,
        item_id: &str,
        include_item: bool,
    ) -> Result<PriorNode> {
        let entry = self.entry(&SeriesKey::new(business_id, item_id));

        if include_item {
            if let Some(node) = entry.as_ref().and_then(|e| self.mature_item_node(e)) {
                return Ok(node);
            }
        }

        if let Some(node) = entry
            .as_ref()
            .and_then(|e| snapshot.categories.get(&e.category))
        {
            return Ok(node.clone());
        }

        if !self.business_has_item_data(business_id) {
            if let Some(profile) = self.profile(business_id) {
                if let Some(node) = archetype::nearest_archetype(snapshot, &profile, &self.config) {
                    return Ok(node);
                }
            }
        }

        if let Some(node) = &snapshot.global {
            return Ok(node.clone());
        }

        Err(ForecastError::PriorUnavailable {
            business_id: business_id.to_string(),
            item_id: item_id.to_string(),
        })
    }

    fn mature_item_node(&self, entry: &ItemEntry) -> Option<PriorNode> {
        let node = entry.node.as_ref()?;
        let mature = entry.observations >= self.config.mature_item_min_observations
            && entry.elapsed_days >= self.config.mature_item_min_days
            && node.width() <= self.config.item_prior_max_width;
        mature.then(|| node.clone())
    }

    /// Prior seeded from the most similar mature businesses.
    pub fn nearest_archetype_prior(&self, profile: &BusinessProfile) -> Result<PriorNode> {
        let snapshot = self.snapshot();
        archetype::nearest_archetype(&snapshot, profile, &self.config).ok_or_else(|| {
            ForecastError::PriorUnavailable {
                business_id: profile.business_id.clone(),
                item_id: String::new(),
            }
        })
    }

    /// Recompute global and category priors from the mature population and
    /// publish a new snapshot.
    ///
    /// Refreshes are serialised; concurrent `ingest` calls keep reading the
    /// previous snapshot until the swap.
    pub fn refresh_population_priors(&self, items: &[ItemSummary]) -> RefreshReport {
        let mut version = lock(&self.refresh_lock);
        *version += 1;

        let features: HashMap<String, BusinessFeatures> = read(&self.profiles)
            .iter()
            .map(|(id, p)| (id.clone(), p.features.clone()))
            .collect();
        let (snapshot, report) = population::compute_population(&self.config, items, &features, *version);

        *write(&self.snapshot) = Arc::new(snapshot);
        info!(
            target: targets::PRIOR,
            version = report.version,
            mature_items = report.mature_items,
            skipped_items = report.skipped_items,
            categories = report.categories,
            global_mean = ?report.global_mean,
            "population priors refreshed"
        );
        report
    }
}

impl Default for PriorHierarchy {
    fn default() -> Self {
        Self::new(PriorConfig::default())
    }
}
