//! Empirical-Bayes population refresh.
//!
//! Global and category priors are recomputed from the current population of
//! mature items, not from any single business. The result is an immutable
//! [`PopulationPriors`] snapshot.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{PriorLevel, PriorNode};
use crate::forecaster::config::PriorConfig;
use crate::types::{BusinessFeatures, ItemSeries, SeriesKey};

/// Per-item statistics fed to the population refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub key: SeriesKey,
    pub category: String,
    /// Calendar days from first to last record, inclusive.
    pub days_observed: i64,
    pub nonzero_days: usize,
    /// Mean exposure-adjusted rate over available open days.
    pub mean_rate: f64,
    /// Sample variance of the exposure-adjusted daily rate.
    pub rate_variance: f64,
    /// Mean exposure-adjusted rate per day of week (0 = Monday).
    pub dow_mean: [Option<f64>; 7],
}

impl ItemSummary {
    /// Summarise a series. Stockout and closed days are excluded from the
    /// rate statistics; returns `None` for a series with no usable day.
    pub fn from_series(
        key: SeriesKey,
        category: impl Into<String>,
        series: &ItemSeries,
        standard_hours_open: f64,
    ) -> Option<Self> {
        let records = series.records();
        let first = records.first()?.date;
        let last = records.last()?.date;

        let mut rates = Vec::with_capacity(records.len());
        let mut dow_sum = [0.0; 7];
        let mut dow_n = [0usize; 7];
        for r in records.iter().filter(|r| r.was_available && r.is_open()) {
            let rate = r.quantity_sold * standard_hours_open / r.hours_open;
            rates.push(rate);
            dow_sum[r.dow()] += rate;
            dow_n[r.dow()] += 1;
        }
        if rates.is_empty() {
            return None;
        }

        let n = rates.len() as f64;
        let mean_rate = rates.iter().sum::<f64>() / n;
        let rate_variance = if rates.len() > 1 {
            rates.iter().map(|x| (x - mean_rate).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let mut dow_mean = [None; 7];
        for d in 0..7 {
            if dow_n[d] > 0 {
                dow_mean[d] = Some(dow_sum[d] / dow_n[d] as f64);
            }
        }

        Some(Self {
            key,
            category: category.into(),
            days_observed: (last - first).num_days() + 1,
            nonzero_days: records.iter().filter(|r| r.quantity_sold > 0.0).count(),
            mean_rate,
            rate_variance,
            dow_mean,
        })
    }

    pub fn is_mature(&self, config: &PriorConfig) -> bool {
        self.days_observed >= config.population_min_days
            && self.nonzero_days >= config.population_min_nonzero_days
            && self.mean_rate.is_finite()
    }
}

/// Business-level summary used for archetype transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub business_id: String,
    pub features: BusinessFeatures,
    /// Mean of the business's mature item rates.
    pub mean_rate: f64,
    /// Variance of the business's mature item rates.
    pub rate_variance: f64,
    pub mature_items: usize,
}

/// Immutable population snapshot, swapped atomically on refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopulationPriors {
    pub version: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub global: Option<PriorNode>,
    pub categories: HashMap<String, PriorNode>,
    pub global_dow: Option<[f64; 7]>,
    pub category_dow: HashMap<String, [f64; 7]>,
    pub businesses: Vec<BusinessSummary>,
}

impl PopulationPriors {
    /// Shared day-of-week factors for a category, falling back to the
    /// global pattern and then to a flat week.
    pub fn dow_factors(&self, category: Option<&str>) -> [f64; 7] {
        category
            .and_then(|c| self.category_dow.get(c))
            .copied()
            .or(self.global_dow)
            .unwrap_or([1.0; 7])
    }
}

/// Summary of one refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub version: u64,
    pub mature_items: usize,
    pub skipped_items: usize,
    pub categories: usize,
    pub businesses: usize,
    pub global_mean: Option<f64>,
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, var)
}

/// Shrunk multiplicative day-of-week pattern from a set of items.
///
/// Each item contributes `ln((dow_mean + 0.5) / (mean + 0.5))`; the
/// per-day log factor is the Normal-Normal posterior mean with prior
/// `N(0, dow_shared_prior_variance)`. Factors are renormalised to average
/// 1.0 and then capped to `[dow_min_factor, dow_max_factor]`.
fn shrunk_dow_pattern<'a, I>(items: I, config: &PriorConfig) -> Option<[f64; 7]>
where
    I: IntoIterator<Item = &'a ItemSummary>,
{
    let mut sum = [0.0; 7];
    let mut n = [0usize; 7];
    for item in items {
        for d in 0..7 {
            if let Some(m) = item.dow_mean[d] {
                sum[d] += ((m + 0.5) / (item.mean_rate + 0.5)).ln();
                n[d] += 1;
            }
        }
    }
    if n.iter().all(|&c| c == 0) {
        return None;
    }

    let prior_precision = 1.0 / config.dow_shared_prior_variance;
    let obs_precision = 1.0 / config.dow_observation_variance;
    let mut factors = [1.0; 7];
    for d in 0..7 {
        let post = sum[d] * obs_precision / (prior_precision + n[d] as f64 * obs_precision);
        factors[d] = post.exp();
    }
    let avg = factors.iter().sum::<f64>() / 7.0;
    for f in factors.iter_mut() {
        *f = (*f / avg).clamp(config.dow_min_factor, config.dow_max_factor);
    }
    Some(factors)
}

/// Compute a new snapshot from item summaries and registered business
/// features.
pub(crate) fn compute_population(
    config: &PriorConfig,
    items: &[ItemSummary],
    features: &HashMap<String, BusinessFeatures>,
    version: u64,
) -> (PopulationPriors, RefreshReport) {
    let mature: Vec<&ItemSummary> = items.iter().filter(|i| i.is_mature(config)).collect();
    let skipped = items.len() - mature.len();
    let mut snapshot = PopulationPriors {
        version,
        refreshed_at: Some(Utc::now()),
        ..Default::default()
    };

    if mature.is_empty() {
        let report = RefreshReport {
            version,
            mature_items: 0,
            skipped_items: skipped,
            categories: 0,
            businesses: 0,
            global_mean: None,
        };
        return (snapshot, report);
    }

    let rates: Vec<f64> = mature.iter().map(|i| i.mean_rate).collect();
    let (global_mean, global_var) = mean_and_variance(&rates);
    let global_var = global_var.max(config.min_prior_variance);
    snapshot.global = Some(
        PriorNode::new(PriorLevel::Global, "global", global_mean.max(0.0), global_var)
            .with_sample_size(mature.len() as f64),
    );
    snapshot.global_dow = shrunk_dow_pattern(mature.iter().copied(), config);

    // BTreeMap keeps the refresh deterministic across runs.
    let mut by_category: BTreeMap<&str, Vec<&ItemSummary>> = BTreeMap::new();
    for item in &mature {
        by_category.entry(item.category.as_str()).or_default().push(item);
    }

    let stats: Vec<(&str, f64, f64, usize)> = by_category
        .iter()
        .map(|(cat, members)| {
            let r: Vec<f64> = members.iter().map(|i| i.mean_rate).collect();
            let (m, v) = mean_and_variance(&r);
            let v = if members.len() > 1 { v } else { global_var };
            (*cat, m, v.max(config.min_prior_variance), members.len())
        })
        .collect();

    // Between-category variance, net of sampling noise in each category mean
    let tau2 = if stats.len() > 1 {
        let means: Vec<f64> = stats.iter().map(|s| s.1).collect();
        let (_, spread) = mean_and_variance(&means);
        let noise = stats.iter().map(|s| s.2 / s.3 as f64).sum::<f64>() / stats.len() as f64;
        (spread - noise).max(config.min_prior_variance)
    } else {
        config.min_prior_variance
    };

    for (cat, m, v, n) in &stats {
        let sampling = v / *n as f64;
        let b = sampling / (sampling + tau2);
        let mean = b * global_mean + (1.0 - b) * m;
        let variance = (b * global_var + (1.0 - b) * v).max(config.min_prior_variance);
        snapshot.categories.insert(
            cat.to_string(),
            PriorNode::new(PriorLevel::Category, *cat, mean.max(0.0), variance)
                .with_sample_size(*n as f64)
                .with_parent(PriorLevel::Global, "global"),
        );
        if let Some(pattern) = shrunk_dow_pattern(by_category[cat].iter().copied(), config) {
            snapshot.category_dow.insert(cat.to_string(), pattern);
        }
    }

    let mut by_business: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for item in &mature {
        by_business
            .entry(item.key.business_id.as_str())
            .or_default()
            .push(item.mean_rate);
    }
    for (business_id, rates) in by_business {
        let Some(business_features) = features.get(business_id) else {
            continue;
        };
        let (m, v) = mean_and_variance(&rates);
        snapshot.businesses.push(BusinessSummary {
            business_id: business_id.to_string(),
            features: business_features.clone(),
            mean_rate: m,
            rate_variance: if rates.len() > 1 { v } else { global_var },
            mature_items: rates.len(),
        });
    }

    let report = RefreshReport {
        version,
        mature_items: mature.len(),
        skipped_items: skipped,
        categories: snapshot.categories.len(),
        businesses: snapshot.businesses.len(),
        global_mean: Some(global_mean),
    };
    (snapshot, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DayRecord;
    use chrono::{Duration, NaiveDate};

    fn summary(business: &str, item: &str, category: &str, mean: f64) -> ItemSummary {
        ItemSummary {
            key: SeriesKey::new(business, item),
            category: category.to_string(),
            days_observed: 90,
            nonzero_days: 80,
            mean_rate: mean,
            rate_variance: mean,
            dow_mean: [Some(mean); 7],
        }
    }

    #[test]
    fn test_from_series_excludes_stockouts_and_closed_days() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut series = ItemSeries::new();
        series.append("x", DayRecord::new(start, 4.0)).unwrap();
        series
            .append(
                "x",
                DayRecord {
                    was_available: false,
                    ..DayRecord::new(start + Duration::days(1), 1.0)
                },
            )
            .unwrap();
        series
            .append(
                "x",
                DayRecord {
                    hours_open: 6.0,
                    ..DayRecord::new(start + Duration::days(2), 3.0)
                },
            )
            .unwrap();
        series
            .append(
                "x",
                DayRecord {
                    hours_open: 0.0,
                    ..DayRecord::new(start + Duration::days(3), 0.0)
                },
            )
            .unwrap();

        let s = ItemSummary::from_series(SeriesKey::new("b", "x"), "mains", &series, 12.0).unwrap();
        assert_eq!(s.days_observed, 4);
        assert_eq!(s.nonzero_days, 3);
        // 4.0 at full hours, 3.0 over half a day -> 6.0
        assert!((s.mean_rate - 5.0).abs() < 1e-12);
        assert_eq!(s.dow_mean[1], None);
    }

    #[test]
    fn test_immature_items_are_skipped() {
        let config = PriorConfig::default();
        let mut young = summary("b1", "new", "mains", 50.0);
        young.days_observed = 30;
        let mut sparse = summary("b1", "rare", "mains", 50.0);
        sparse.nonzero_days = 10;
        let items = vec![summary("b1", "a", "mains", 10.0), young, sparse];
        let (snap, report) = compute_population(&config, &items, &HashMap::new(), 1);
        assert_eq!(report.mature_items, 1);
        assert_eq!(report.skipped_items, 2);
        assert!((snap.global.unwrap().mean - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_category_means_shrink_toward_global() {
        let config = PriorConfig::default();
        let items = vec![
            summary("b1", "a", "mains", 10.0),
            summary("b1", "b", "mains", 14.0),
            summary("b2", "c", "drinks", 30.0),
            summary("b2", "d", "drinks", 26.0),
            summary("b3", "e", "desserts", 6.0),
        ];
        let (snap, report) = compute_population(&config, &items, &HashMap::new(), 3);
        assert_eq!(report.categories, 3);
        let global = snap.global.as_ref().unwrap().mean;
        let mains = &snap.categories["mains"];
        assert!(mains.mean >= 12.0 && mains.mean <= global, "mains {}", mains.mean);
        let desserts = &snap.categories["desserts"];
        // A single-item category is pulled harder than a two-item one
        assert!(desserts.mean > 6.0);
        assert_eq!(mains.parent.as_ref().unwrap().level, PriorLevel::Global);
    }

    #[test]
    fn test_dow_pattern_capped_and_averages_near_one() {
        let config = PriorConfig::default();
        let mut items = Vec::new();
        for i in 0..10 {
            let mut s = summary("b", &format!("i{i}"), "mains", 10.0);
            s.dow_mean = [Some(8.0), Some(8.0), Some(8.0), Some(9.0), Some(12.0), Some(200.0), Some(0.0)];
            items.push(s);
        }
        let (snap, _) = compute_population(&config, &items, &HashMap::new(), 1);
        let f = snap.dow_factors(Some("mains"));
        assert!(f.iter().all(|&x| (0.3..=3.0).contains(&x)), "{f:?}");
        assert!(f[5] > f[4] && f[4] > f[0]);
        assert_eq!(snap.dow_factors(Some("unknown")), snap.global_dow.unwrap());
    }

    #[test]
    fn test_empty_population() {
        let (snap, report) = compute_population(&PriorConfig::default(), &[], &HashMap::new(), 7);
        assert!(snap.global.is_none());
        assert_eq!(report.version, 7);
        assert_eq!(snap.dow_factors(None), [1.0; 7]);
    }
}
