use chrono::NaiveDate;
use thiserror::Error;

/// Per-record input validation failures.
///
/// A validation failure rejects one record and leaves every posterior
/// untouched; the rest of the batch continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("negative quantity {quantity} for item {item_id}")]
    NegativeQuantity { item_id: String, quantity: f64 },
    #[error("non-finite quantity for item {item_id}")]
    NonFiniteQuantity { item_id: String },
    #[error("record for item {item_id} has no date")]
    MissingDate { item_id: String },
    #[error("item {item_id} is not registered for business {business_id}")]
    UnknownItem { business_id: String, item_id: String },
    #[error("unknown business {0}")]
    UnknownBusiness(String),
    #[error("record dated {date} for item {item_id} is not after the last recorded day {last}")]
    OutOfOrder {
        item_id: String,
        date: NaiveDate,
        last: NaiveDate,
    },
    #[error("hours_open {hours} for item {item_id} outside [0, 24]")]
    InvalidHoursOpen { item_id: String, hours: f64 },
    #[error("discount fraction {0} outside (0, 1]")]
    InvalidDiscount(f64),
    #[error("invalid promotion observation: {0}")]
    InvalidPromotion(String),
    #[error("no recorded day {date} for item {item_id}")]
    NoSuchDay { item_id: String, date: NaiveDate },
}

/// Configuration errors, raised once at engine construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Main error type for the forecasting engine.
#[derive(Error, Debug, Clone)]
pub enum ForecastError {
    /// Malformed or out-of-order input, rejected locally.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No hierarchy prior is reachable. Recovered by the updater with the
    /// documented wide default; surfaced only by direct hierarchy lookups.
    #[error("no prior available for {business_id}/{item_id}")]
    PriorUnavailable { business_id: String, item_id: String },

    /// A computed rate, variance or dispersion was zero, negative or NaN.
    /// The update is rejected and the previous state retained.
    #[error("numeric degeneracy in {quantity}: {value}")]
    NumericDegeneracy { quantity: &'static str, value: f64 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ForecastError {
    /// Whether the caller should treat this as a per-record rejection
    /// rather than an engine failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ForecastError::Validation(_) | ForecastError::NumericDegeneracy { .. }
        )
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        ForecastError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ForecastError {
    fn from(err: toml::de::Error) -> Self {
        ForecastError::Config(ConfigError::Parse(err.to_string()))
    }
}
