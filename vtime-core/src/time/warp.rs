//! Warp drive: runs the virtual clock faster or slower than the host.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Percentage at which warp is a no-op.
pub const WARP_NORMAL: u32 = 100;
pub const WARP_MIN: u32 = 2;
pub const WARP_MAX: u32 = 20_000;

#[derive(Debug)]
pub struct WarpDrive {
    percentage: AtomicU32,
    start: AtomicU64,
}

impl WarpDrive {
    pub fn new(percentage: u32) -> Self {
        Self {
            percentage: AtomicU32::new(percentage),
            start: AtomicU64::new(0),
        }
    }

    pub fn percentage(&self) -> u32 {
        self.percentage.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.percentage() != WARP_NORMAL
    }

    /// Raw time at which the current warp epoch began.
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn is_valid_percentage(percentage: u32) -> bool {
        (WARP_MIN..=WARP_MAX).contains(&percentage)
    }

    /// Caller must hold the clock lock with the primary clock paused.
    pub(crate) fn set_percentage(&self, percentage: u32) {
        self.percentage.store(percentage, Ordering::Release);
    }

    pub(crate) fn set_start(&self, raw: u64) {
        self.start.store(raw, Ordering::Release);
    }

    /// Applies the warp factor to `raw` and subtracts the pause `offset`.
    #[inline]
    pub fn scale(&self, raw: u64, offset: u64) -> u64 {
        let percentage = self.percentage();
        if percentage == WARP_NORMAL {
            return raw.wrapping_sub(offset);
        }
        let start = self.start();
        let elapsed = u128::from(raw.wrapping_sub(start));
        let warped = (elapsed * u128::from(percentage) / 100) as u64;
        start.wrapping_add(warped).wrapping_sub(offset)
    }
}

impl Default for WarpDrive {
    fn default() -> Self {
        Self::new(WARP_NORMAL)
    }
}
