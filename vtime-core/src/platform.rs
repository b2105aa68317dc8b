//! ## vtime-core::platform
//! **Host time source: calibration snapshots and the raw counter**
//!
//! The host publishes one [`SnapshotCell`] per core (or a single one when all
//! counters are synchronized). Each cell is a seqlock: the writer makes the
//! transaction id odd, updates the fields and makes it even again, so readers can
//! detect a torn read without taking a lock.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// How counter calibration data is laid out on the info page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// All counters run in lockstep; cell 0 is authoritative.
    Synchronous,
    /// Each core has its own counter and its own cell.
    PerCore,
}

/// Calibration data for one counter, as captured by a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSnapshot {
    /// Counter value at the last recalibration.
    pub counter: u64,
    /// Nanosecond timestamp matching `counter`.
    pub nano_anchor: u64,
    /// Counter ticks per update interval.
    pub interval_counter: u32,
    /// Nanoseconds per update interval.
    pub interval_nanos: u32,
    /// Seqlock generation; odd while an update is in flight.
    pub transaction_id: u32,
}

/// Lock-free, single-writer publication slot for a [`TimeSnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotCell {
    transaction_id: AtomicU32,
    counter: AtomicU64,
    nano_anchor: AtomicU64,
    interval_counter: AtomicU32,
    interval_nanos: AtomicU32,
}

impl SnapshotCell {
    pub fn new(initial: TimeSnapshot) -> Self {
        Self {
            transaction_id: AtomicU32::new(0),
            counter: AtomicU64::new(initial.counter),
            nano_anchor: AtomicU64::new(initial.nano_anchor),
            interval_counter: AtomicU32::new(initial.interval_counter),
            interval_nanos: AtomicU32::new(initial.interval_nanos),
        }
    }

    /// Reads the fields. The result may be torn; check it with [`Self::is_current`].
    #[inline]
    pub fn read(&self) -> TimeSnapshot {
        let transaction_id = self.transaction_id.load(Ordering::Acquire);
        TimeSnapshot {
            counter: self.counter.load(Ordering::Relaxed),
            nano_anchor: self.nano_anchor.load(Ordering::Relaxed),
            interval_counter: self.interval_counter.load(Ordering::Relaxed),
            interval_nanos: self.interval_nanos.load(Ordering::Relaxed),
            transaction_id,
        }
    }

    /// True when `transaction_id` was even and no update started since it was read.
    #[inline]
    pub fn is_current(&self, transaction_id: u32) -> bool {
        fence(Ordering::Acquire);
        transaction_id & 1 == 0 && self.transaction_id.load(Ordering::Relaxed) == transaction_id
    }

    /// Publishes new calibration data. Writers must be serialized by the caller.
    pub fn publish(&self, snapshot: &TimeSnapshot) {
        self.transaction_id.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        self.counter.store(snapshot.counter, Ordering::Relaxed);
        self.nano_anchor.store(snapshot.nano_anchor, Ordering::Relaxed);
        self.interval_counter
            .store(snapshot.interval_counter, Ordering::Relaxed);
        self.interval_nanos
            .store(snapshot.interval_nanos, Ordering::Relaxed);
        self.transaction_id.fetch_add(1, Ordering::Release);
    }
}

/// The host's calibration page.
#[derive(Debug)]
pub struct InfoPage {
    mode: SourceMode,
    cells: Box<[SnapshotCell]>,
}

impl InfoPage {
    /// Creates a page with `cells` slots, all starting from `initial`.
    ///
    /// # Panics
    /// If `cells` is zero.
    pub fn new(mode: SourceMode, cells: usize, initial: TimeSnapshot) -> Self {
        assert!(cells > 0, "info page needs at least one snapshot cell");
        Self {
            mode,
            cells: (0..cells).map(|_| SnapshotCell::new(initial)).collect(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Cell for `core`, if the page has one.
    pub fn cell(&self, core: usize) -> Option<&SnapshotCell> {
        self.cells.get(core)
    }

    /// Cell 0, the global cell in synchronous mode.
    pub fn primary_cell(&self) -> &SnapshotCell {
        &self.cells[0]
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Capabilities the host platform provides to the virtual clocks.
pub trait Platform: Send + Sync {
    /// The calibration page, or `None` if the host never set it up.
    fn info_page(&self) -> Option<&InfoPage>;

    /// Reads the calling core's hardware counter.
    fn read_counter(&self) -> u64;

    /// Identifies the core the calling thread currently runs on.
    fn current_core(&self) -> usize;

    /// Host-provided monotonic nanosecond timestamp.
    fn host_nano_ts(&self) -> u64;
}
