//! Infrastructure: logging setup, log targets and lock helpers.

mod logging;
pub(crate) mod sync;

pub use logging::*;
