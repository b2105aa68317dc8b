//! # Simulated per-core counters
//!
//! Each simulated core owns a hardware counter driven by its own notion of
//! elapsed nanoseconds, plus the calibration cell the host would publish for
//! it. A core's calibration may be off by a fixed skew, which is how real
//! hosts end up with cores disagreeing on the time.
//!
//! ## Expectations:
//! - Nanosecond resolution
//! - Deterministic for a given step sequence
//! - Readers never take the writer lock

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use vtime_core::platform::{SnapshotCell, TimeSnapshot};

#[derive(Debug)]
pub struct CoreClock {
    nanos: AtomicU64,
    counter: AtomicU64,
    counter_hz: u64,
    skew_ns: u64,
    interval_counter: u32,
    interval_nanos: u32,
    anchor_nanos: AtomicU64,
    writer: Mutex<()>,
}

impl CoreClock {
    pub fn new(
        start_ns: u64,
        counter_hz: u64,
        skew_ns: u64,
        interval_counter: u32,
        interval_nanos: u32,
    ) -> Self {
        Self {
            nanos: AtomicU64::new(start_ns),
            counter: AtomicU64::new(ticks(start_ns, counter_hz)),
            counter_hz,
            skew_ns,
            interval_counter,
            interval_nanos,
            anchor_nanos: AtomicU64::new(start_ns),
            writer: Mutex::new(()),
        }
    }

    /// Calibration matching the current counter value.
    pub fn snapshot(&self) -> TimeSnapshot {
        let nanos = self.nanos.load(Ordering::Acquire);
        TimeSnapshot {
            counter: ticks(nanos, self.counter_hz),
            nano_anchor: nanos + self.skew_ns,
            interval_counter: self.interval_counter,
            interval_nanos: self.interval_nanos,
            transaction_id: 0,
        }
    }

    /// Current nanoseconds as seen by this core.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.nanos.load(Ordering::Acquire) + self.skew_ns
    }

    #[inline]
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn skew_ns(&self) -> u64 {
        self.skew_ns
    }

    /// Runs the core forward by `ns`, recalibrating `cell` once a full update
    /// interval has passed since the last calibration.
    pub fn advance(&self, ns: u64, cell: &SnapshotCell) {
        let _writer = self.writer.lock();
        let nanos = self.nanos.fetch_add(ns, Ordering::AcqRel) + ns;
        self.counter.store(ticks(nanos, self.counter_hz), Ordering::Release);

        let anchor = self.anchor_nanos.load(Ordering::Acquire);
        if nanos - anchor >= u64::from(self.interval_nanos) {
            self.anchor_nanos.store(nanos, Ordering::Release);
            cell.publish(&self.snapshot());
        }
    }

    /// Republishes the current calibration unchanged, tearing concurrent reads.
    pub fn republish(&self, cell: &SnapshotCell) {
        let _writer = self.writer.lock();
        cell.publish(&cell.read());
    }
}

/// Counter ticks after `nanos` nanoseconds at `hz`.
pub fn ticks(nanos: u64, hz: u64) -> u64 {
    (u128::from(nanos) * u128::from(hz) / 1_000_000_000) as u64
}
