//! Tick/time conversion helpers for batdev_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Number of milliseconds in one hour (coulomb counting).
pub const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Convert seconds to ticks for the given tick period, rounding up so a
/// deadline never fires early.
/// - Clamps `tick_ms` to at least 1 to avoid division by zero.
/// - Saturates at `u32::MAX`.
#[inline]
pub fn secs_to_ticks(secs: u32, tick_ms: u32) -> u32 {
    ms_to_ticks(u64::from(secs) * MILLIS_PER_SEC, tick_ms)
}

/// Convert milliseconds to ticks, rounding up.
#[inline]
pub fn ms_to_ticks(ms: u64, tick_ms: u32) -> u32 {
    let ticks = ms.div_ceil(u64::from(tick_ms.max(1)));
    u32::try_from(ticks).unwrap_or(u32::MAX)
}

/// Convert a tick count to milliseconds.
#[inline]
pub fn ticks_to_ms(ticks: u32, tick_ms: u32) -> u64 {
    u64::from(ticks) * u64::from(tick_ms)
}
