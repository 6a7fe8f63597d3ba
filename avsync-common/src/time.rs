//! Timestamp utilities
//!
//! Clocks in the engine are expressed in seconds as `f64` against a
//! process-wide monotonic origin, so that positions, wall-clock anchors and
//! deltas can be mixed freely in the sync arithmetic.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::time::Instant;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Get current UTC timestamp (for events)
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds elapsed on the monotonic clock since the first call in this process
pub fn monotonic_secs() -> f64 {
    ORIGIN.elapsed().as_secs_f64()
}

/// Convert seconds to microseconds, the unit used for seek targets
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * 1_000_000.0) as i64
}

/// Convert microseconds to seconds
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}
