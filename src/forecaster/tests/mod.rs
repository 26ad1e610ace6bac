//! Cross-component suites: statistical properties and end-to-end
//! scenarios, driven by seeded simulations.

mod properties;

use chrono::{Duration, NaiveDate};

use crate::forecaster::{EngineConfig, ForecastEngine};
use crate::types::{BusinessFeatures, BusinessProfile, DayRecord, SeriesKey};

/// A Monday.
pub(crate) fn day0() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub(crate) fn day(i: i64) -> NaiveDate {
    day0() + Duration::days(i)
}

pub(crate) fn engine_with(items: &[(&str, &str, &str)]) -> ForecastEngine {
    let engine = ForecastEngine::new(EngineConfig::default()).unwrap();
    let mut businesses: Vec<&str> = items.iter().map(|(b, _, _)| *b).collect();
    businesses.dedup();
    for b in businesses {
        engine.register_business(BusinessProfile::new(b, BusinessFeatures::default()));
    }
    for (b, i, c) in items {
        engine.register_item(SeriesKey::new(*b, *i), *c);
    }
    engine
}

pub(crate) fn feed(engine: &ForecastEngine, key: &SeriesKey, quantities: &[f64]) {
    for (i, q) in quantities.iter().enumerate() {
        engine.ingest(key, &DayRecord::new(day(i as i64), *q)).unwrap();
    }
}
