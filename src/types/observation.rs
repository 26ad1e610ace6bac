//! Daily observation records and per-series history.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Identifier of one (business, item) series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub business_id: String,
    pub item_id: String,
}

impl SeriesKey {
    pub fn new(business_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.business_id, self.item_id)
    }
}

/// Raw record as supplied by the ingestion collaborator.
///
/// Unvalidated: quantities may be negative, dates may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub item_id: String,
    /// Overrides the batch date when present.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub quantity_sold: f64,
    #[serde(default = "default_available")]
    pub was_available: bool,
    #[serde(default = "default_hours_open")]
    pub hours_open: f64,
}

fn default_available() -> bool {
    true
}

fn default_hours_open() -> f64 {
    12.0
}

impl ObservationRecord {
    pub fn new(item_id: impl Into<String>, quantity_sold: f64) -> Self {
        Self {
            item_id: item_id.into(),
            date: None,
            quantity_sold,
            was_available: true,
            hours_open: default_hours_open(),
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn stocked_out(mut self) -> Self {
        self.was_available = false;
        self
    }

    pub fn with_hours(mut self, hours_open: f64) -> Self {
        self.hours_open = hours_open;
        self
    }

    /// Validate into a [`DayRecord`], resolving the date against the batch.
    pub fn validate(&self, batch_date: Option<NaiveDate>) -> Result<DayRecord, ValidationError> {
        let date = self
            .date
            .or(batch_date)
            .ok_or_else(|| ValidationError::MissingDate {
                item_id: self.item_id.clone(),
            })?;

        if !self.quantity_sold.is_finite() {
            return Err(ValidationError::NonFiniteQuantity {
                item_id: self.item_id.clone(),
            });
        }
        if self.quantity_sold < 0.0 {
            return Err(ValidationError::NegativeQuantity {
                item_id: self.item_id.clone(),
                quantity: self.quantity_sold,
            });
        }
        if !self.hours_open.is_finite() || !(0.0..=24.0).contains(&self.hours_open) {
            return Err(ValidationError::InvalidHoursOpen {
                item_id: self.item_id.clone(),
                hours: self.hours_open,
            });
        }

        Ok(DayRecord {
            date,
            quantity_sold: self.quantity_sold,
            was_available: self.was_available,
            hours_open: self.hours_open,
        })
    }
}

/// One business's observations for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub business_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub records: Vec<ObservationRecord>,
}

/// A validated daily observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub quantity_sold: f64,
    /// `false` marks a stockout: the quantity is a lower bound on demand.
    pub was_available: bool,
    pub hours_open: f64,
}

impl DayRecord {
    pub fn new(date: NaiveDate, quantity_sold: f64) -> Self {
        Self {
            date,
            quantity_sold,
            was_available: true,
            hours_open: default_hours_open(),
        }
    }

    /// Day of week, 0 = Monday.
    pub fn dow(&self) -> usize {
        weekday_index(self.date)
    }

    pub fn is_open(&self) -> bool {
        self.hours_open > 0.0
    }

    pub fn is_censored(&self) -> bool {
        !self.was_available
    }

    /// Observed quantity as an integer count for the likelihood.
    pub fn count(&self) -> u64 {
        self.quantity_sold.round().max(0.0) as u64
    }
}

/// Day-of-week index, 0 = Monday through 6 = Sunday.
pub fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

/// Ordered, append-only daily history for one (business, item) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSeries {
    records: Vec<DayRecord>,
}

impl ItemSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[DayRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Check that `record` may be appended without breaking date order.
    pub fn check_append(&self, item_id: &str, record: &DayRecord) -> Result<(), ValidationError> {
        match self.last_date() {
            Some(last) if record.date <= last => Err(ValidationError::OutOfOrder {
                item_id: item_id.to_string(),
                date: record.date,
                last,
            }),
            _ => Ok(()),
        }
    }

    pub fn append(&mut self, item_id: &str, record: DayRecord) -> Result<(), ValidationError> {
        self.check_append(item_id, &record)?;
        self.records.push(record);
        Ok(())
    }

    /// Retroactively correct the stockout flag for one recorded day.
    ///
    /// Returns `true` if the flag actually changed.
    pub fn correct_availability(
        &mut self,
        item_id: &str,
        date: NaiveDate,
        was_available: bool,
    ) -> Result<bool, ValidationError> {
        let idx = self
            .records
            .binary_search_by_key(&date, |r| r.date)
            .map_err(|_| ValidationError::NoSuchDay {
                item_id: item_id.to_string(),
                date,
            })?;
        let record = &mut self.records[idx];
        let changed = record.was_available != was_available;
        record.was_available = was_available;
        Ok(changed)
    }
}
