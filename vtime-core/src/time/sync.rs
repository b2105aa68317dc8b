//! ## vtime-core::time::sync
//! **The synchronized virtual clock**
//!
//! Trails the primary clock by `offset`. When timers on it fire late the
//! offset is shrunk gradually (catch-up) until only the permanently
//! abandoned part, `given_up`, remains. The clock stops at the expiry of its
//! earliest timer and stays stopped until [`SyncClock::rearm`] runs.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};
use vtime_config::SyncConfig;

use crate::signals::Scheduler;
use crate::stats::ClockStats;
use crate::time::ClockState;

/// What [`SyncClock::rearm`] decided to do with the accumulated lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmOutcome {
    /// Lag kept as is; no catch-up needed.
    Carried { lag: u64 },
    /// Catch-up started at `percentage` extra speed.
    CatchingUp { lag: u64, percentage: u32 },
    /// Lag exceeded the give-up threshold and was abandoned for good.
    GaveUp { lag: u64 },
}

#[derive(Debug, Default)]
pub struct SyncClock {
    ticking: AtomicBool,
    offset: AtomicU64,
    given_up: AtomicU64,
    catching_up: AtomicBool,
    catch_up_percentage: AtomicU32,
    catch_up_prev: AtomicU64,
    frozen: AtomicU64,
}

impl SyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ClockState {
        if self.ticking.load(Ordering::Acquire) {
            ClockState::Ticking
        } else {
            ClockState::Stopped(self.frozen.load(Ordering::Acquire))
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn given_up(&self) -> u64 {
        self.given_up.load(Ordering::Acquire)
    }

    pub fn is_catching_up(&self) -> bool {
        self.catching_up.load(Ordering::Acquire)
    }

    /// Distance still to be made up, excluding the abandoned part.
    pub fn lag(&self) -> u64 {
        self.offset().saturating_sub(self.given_up())
    }

    /// Current catch-up rate, zero when not catching up.
    pub fn catch_up_percentage(&self) -> u32 {
        if self.is_catching_up() {
            self.catch_up_percentage.load(Ordering::Acquire)
        } else {
            0
        }
    }

    /// Offset to subtract from primary time `now`, applying a catch-up step
    /// first if one is in progress and the lock is free.
    pub(crate) fn offset_for(&self, now: u64, lock: &Mutex<()>, stats: &ClockStats) -> u64 {
        if !self.is_catching_up() {
            return self.offset();
        }
        let Some(_guard) = lock.try_lock() else {
            stats.record_catch_up_skipped();
            return self.offset();
        };
        if !self.is_catching_up() {
            return self.offset();
        }

        let mut offset = self.offset();
        let prev = self.catch_up_prev.load(Ordering::Acquire);
        let delta = now.wrapping_sub(prev);
        if delta >> 32 != 0 {
            // Either the primary clock moved backwards or we were not polled
            // for over four seconds; skip this interval.
            if delta & (1 << 63) == 0 {
                self.catch_up_prev.store(now, Ordering::Release);
            }
            debug!(delta, "catch-up interval ignored");
            return offset;
        }

        let percentage = u64::from(self.catch_up_percentage.load(Ordering::Acquire));
        let step = delta * percentage / 100;
        let given_up = self.given_up();
        self.catch_up_prev.store(now, Ordering::Release);
        if offset > step + given_up {
            offset -= step;
            self.offset.store(offset, Ordering::Release);
            stats.record_catch_up_step();
            trace!(offset, step, "catching up");
        } else {
            offset = given_up;
            self.offset.store(offset, Ordering::Release);
            self.catching_up.store(false, Ordering::Release);
            stats.record_catch_up_completed();
            debug!(offset, "caught up");
        }
        offset
    }

    /// Stops the clock at `boundary` if nobody else holds the lock.
    pub(crate) fn clamp_at(
        &self,
        boundary: u64,
        lock: &Mutex<()>,
        scheduler: &dyn Scheduler,
        stats: &ClockStats,
    ) -> bool {
        let Some(_guard) = lock.try_lock() else {
            return false;
        };
        if !self.is_ticking() {
            return false;
        }
        self.freeze(boundary);
        scheduler.raise_sync_boundary();
        stats.record_sync_clamp();
        trace!(boundary, "synchronized clock stopped at timer boundary");
        true
    }

    /// Holds the clock at `value`. Caller holds the clock lock.
    pub(crate) fn freeze(&self, value: u64) {
        self.frozen.store(value, Ordering::Release);
        self.ticking.store(false, Ordering::Release);
    }

    pub(crate) fn start_ticking(&self) {
        self.ticking.store(true, Ordering::Release);
    }

    /// Restarts a stopped clock at its frozen value, deciding what to do with
    /// the lag that builds up between it and the primary clock at `primary_now`.
    /// Caller holds the clock lock.
    pub(crate) fn rearm(
        &self,
        primary_now: u64,
        policy: &SyncConfig,
        stats: &ClockStats,
    ) -> RearmOutcome {
        let frozen = self.frozen.load(Ordering::Acquire);
        let given_up = self.given_up();
        let offset = primary_now.saturating_sub(frozen).max(given_up);
        let lag = offset - given_up;

        self.offset.store(offset, Ordering::Release);
        let outcome = if lag > policy.give_up_threshold_ns {
            self.given_up.store(offset, Ordering::Release);
            self.catching_up.store(false, Ordering::Release);
            stats.record_sync_give_up();
            RearmOutcome::GaveUp { lag }
        } else if let Some(percentage) = policy.percentage_for(lag) {
            self.begin_catch_up(percentage, primary_now);
            RearmOutcome::CatchingUp { lag, percentage }
        } else {
            RearmOutcome::Carried { lag }
        };
        self.start_ticking();
        outcome
    }

    /// Starts or retunes catch-up. Caller holds the clock lock.
    pub(crate) fn begin_catch_up(&self, percentage: u32, primary_now: u64) {
        self.catch_up_percentage.store(percentage, Ordering::Release);
        if !self.is_catching_up() {
            self.catch_up_prev.store(primary_now, Ordering::Release);
        }
        self.catching_up.store(true, Ordering::Release);
    }
}
