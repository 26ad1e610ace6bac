use crate::errors::ForecastError;

pub type Result<T> = std::result::Result<T, ForecastError>;
