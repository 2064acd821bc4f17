//! Common time/period helpers for timeswipe_core.

use std::time::Duration;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Compute the tick period in microseconds for a given rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

#[inline]
pub fn period(hz: u32) -> Duration {
    Duration::from_micros(period_us(hz))
}

/// Number of ticks covering `ms` milliseconds at `hz`, at least 1.
#[inline]
pub fn ticks_for_ms(ms: u64, hz: u32) -> u64 {
    (ms.saturating_mul(u64::from(hz)) / 1000).max(1)
}
