//! ## vtime-core::time::raw
//! **Monotonic raw nanosecond clock**
//!
//! Every reader converts the host counter to nanoseconds through a
//! [`NanoSource`], guards the result against the last published value and then
//! tries to publish it with a compare-and-swap. The published value never moves
//! backwards while the clock runs; [`RawClock::reset`] is the only way down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};
use vtime_config::{ClockConfig, RawSourceKind};

use crate::platform::Platform;
use crate::signals::{CallerRole, Scheduler};
use crate::stats::ClockStats;
use crate::time::reader::{read_snapshot, SourceReading};

pub const ONE_SECOND_NS: u64 = 1_000_000_000;

/// Update interval assumed when the host timestamp carries no calibration data.
pub const DEFAULT_UPDATE_INTERVAL_NS: u32 = 10_000_000;

/// A nanosecond reading plus the update interval it was calibrated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub nanos: u64,
    pub interval_nanos: u32,
}

/// Converts host state into a candidate nanosecond timestamp.
pub trait NanoSource: Send + Sync + fmt::Debug {
    fn candidate(&self, platform: &dyn Platform, stats: &ClockStats) -> Candidate;
}

/// Computes nanoseconds from the info page snapshot and the hardware counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct GipNanoSource;

impl NanoSource for GipNanoSource {
    fn candidate(&self, platform: &dyn Platform, stats: &ClockStats) -> Candidate {
        let SourceReading {
            snapshot,
            counter_now,
        } = read_snapshot(platform, stats);
        let elapsed = scale_delta(
            counter_now.wrapping_sub(snapshot.counter),
            snapshot.interval_counter,
            snapshot.interval_nanos,
        );
        Candidate {
            nanos: snapshot.nano_anchor.wrapping_add(elapsed),
            interval_nanos: snapshot.interval_nanos,
        }
    }
}

/// Delegates to the host's own nanosecond timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostNanoSource;

impl NanoSource for HostNanoSource {
    fn candidate(&self, platform: &dyn Platform, _stats: &ClockStats) -> Candidate {
        Candidate {
            nanos: platform.host_nano_ts(),
            interval_nanos: DEFAULT_UPDATE_INTERVAL_NS,
        }
    }
}

/// Builds the configured raw time strategy.
pub fn nano_source(kind: RawSourceKind) -> Box<dyn NanoSource> {
    match kind {
        RawSourceKind::Computed => Box::new(GipNanoSource),
        RawSourceKind::Host => Box::new(HostNanoSource),
    }
}

/// Scales counter ticks since the last recalibration to nanoseconds.
///
/// The delta is clamped to one update interval so a stale snapshot can never
/// extrapolate further than the host promised to recalibrate.
#[inline]
pub fn scale_delta(delta: u64, interval_counter: u32, interval_nanos: u32) -> u64 {
    if interval_counter == 0 {
        return 0;
    }
    let delta = delta.min(u64::from(interval_counter));
    delta * u64::from(interval_nanos) / u64::from(interval_counter)
}

pub struct RawClock {
    last: CachePadded<AtomicU64>,
    source: Box<dyn NanoSource>,
    retry_limit: u32,
    early_exit_below: u32,
}

impl fmt::Debug for RawClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawClock")
            .field("last", &self.last())
            .field("source", &self.source)
            .field("retry_limit", &self.retry_limit)
            .field("early_exit_below", &self.early_exit_below)
            .finish()
    }
}

impl RawClock {
    pub fn new(source: Box<dyn NanoSource>, retry_limit: u32, early_exit_below: u32) -> Self {
        Self {
            last: CachePadded::new(AtomicU64::new(0)),
            source,
            retry_limit,
            early_exit_below,
        }
    }

    pub fn from_config(config: &ClockConfig) -> Self {
        Self::new(
            nano_source(config.raw_source),
            config.cas_retry_limit,
            config.cas_early_exit_below,
        )
    }

    /// Last published raw timestamp.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Forgets the published value. Only legal while the virtual clock is paused.
    pub fn reset(&self) {
        self.last.store(0, Ordering::Release);
    }

    /// Reads the current raw time in nanoseconds.
    pub fn now(
        &self,
        platform: &dyn Platform,
        role: CallerRole,
        scheduler: &dyn Scheduler,
        stats: &ClockStats,
    ) -> u64 {
        let candidate = self.source.candidate(platform, stats);
        let prev = self.last.load(Ordering::Acquire);
        let nanos = guard(candidate, prev, scheduler, stats);
        self.publish(prev, nanos, role, stats)
    }

    fn publish(&self, observed: u64, nanos: u64, role: CallerRole, stats: &ClockStats) -> u64 {
        let mut current = observed;
        let mut tries = self.retry_limit;
        while current < nanos {
            match self
                .last
                .compare_exchange(current, nanos, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return nanos,
                Err(actual) => current = actual,
            }
            // A newer value published by someone else wins over giving up.
            if current >= nanos {
                break;
            }

            tries = tries.saturating_sub(1);
            let early_exit = role == CallerRole::Other && tries < self.early_exit_below;
            if tries == 0 || early_exit {
                stats.record_cas_give_up();
                trace!(nanos, current, "raw clock publication abandoned");
                return nanos;
            }
        }
        current
    }
}

/// Turns a candidate into the value to publish, given the last published one.
fn guard(candidate: Candidate, prev: u64, scheduler: &dyn Scheduler, stats: &ClockStats) -> u64 {
    let nanos = candidate.nanos;
    let delta = nanos.wrapping_sub(prev);
    if delta < ONE_SECOND_NS {
        return nanos;
    }

    let signed = delta as i64;
    if signed < 0 && signed > -2 * i64::from(candidate.interval_nanos) {
        stats.record_regression();
        scheduler.request_resync();
        trace!(prev, nanos, "raw clock stepped back within two intervals");
        return prev.wrapping_add(1);
    }

    if prev != 0 {
        stats.record_anomaly();
        if signed < 0 {
            warn!(delta = signed, prev, nanos, "raw clock went backwards");
        } else {
            debug!(delta = signed, prev, nanos, "raw clock jumped forward");
        }
    }
    nanos
}
