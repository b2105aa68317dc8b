//! Tick conversions for the virtual clocks.
//!
//! Both clocks tick in nanoseconds, so a tick is a nanosecond and the
//! conversions reduce to truncating divisions and plain multiplications.

/// Ticks per second of the virtual clocks.
pub const FREQUENCY_HZ: u64 = 1_000_000_000;

#[inline]
pub const fn to_nanos(ticks: u64) -> u64 {
    ticks
}

#[inline]
pub const fn to_micros(ticks: u64) -> u64 {
    ticks / 1_000
}

#[inline]
pub const fn to_millis(ticks: u64) -> u64 {
    ticks / 1_000_000
}

#[inline]
pub const fn from_nanos(nanos: u64) -> u64 {
    nanos
}

/// Wraps on overflow; callers pass realistic durations.
#[inline]
pub const fn from_micros(micros: u64) -> u64 {
    micros.wrapping_mul(1_000)
}

#[inline]
pub const fn from_millis(millis: u64) -> u64 {
    millis.wrapping_mul(1_000_000)
}
