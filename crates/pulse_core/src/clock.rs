//! Process-monotonic clock.
//!
//! The scheduling gate stores timestamps in atomics where `0` means
//! "never", so the clock is offset to be strictly positive.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since a process-wide epoch captured on first use.
///
/// Monotonic and strictly greater than zero.
#[must_use]
pub fn monotonic_nanos() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64 + 1
}
