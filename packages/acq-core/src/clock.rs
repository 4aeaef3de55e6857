//! Process-wide monotonic clock shared by producers and the trigger loop.
//!
//! Stream epochs (`tzero`), gate stamps and loop timing all use seconds
//! from this clock so they can be compared across threads.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since the first call in this process.
pub fn now_secs() -> f64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}
