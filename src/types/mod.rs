//! Shared value types: observations, series and business profiles.

mod business;
mod observation;

pub use business::*;
pub use observation::*;
