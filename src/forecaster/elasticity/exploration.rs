//! Exploration allocation.
//!
//! Whether a promotion slot is reserved for exploration depends only on a
//! hash of the deployment seed, the series and the date. Nothing the
//! optimiser sees can influence it, and re-asking for the same slot always
//! gives the same answer.

use chrono::{Datelike, NaiveDate};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::types::SeriesKey;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable 64-bit slot identifier for `(seed, business, item, date)`.
pub fn slot_hash(seed: u64, key: &SeriesKey, date: NaiveDate) -> u64 {
    let mut h = fnv1a(FNV_OFFSET, &seed.to_le_bytes());
    h = fnv1a(h, key.business_id.as_bytes());
    h = fnv1a(h, &[0xff]);
    h = fnv1a(h, key.item_id.as_bytes());
    h = fnv1a(h, &[0xff]);
    fnv1a(h, &date.num_days_from_ce().to_le_bytes())
}

/// Bernoulli(`rate`) draw from an RNG seeded by the slot hash alone.
pub fn allocate(seed: u64, rate: f64, key: &SeriesKey, date: NaiveDate) -> bool {
    let mut rng = SmallRng::seed_from_u64(slot_hash(seed, key, date));
    rng.gen_bool(rate.clamp(0.0, 1.0))
}
