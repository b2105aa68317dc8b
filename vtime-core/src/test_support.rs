//! Hand-driven fakes for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vtime_config::{RawSourceKind, VtimeConfig};

use crate::platform::{InfoPage, Platform, SnapshotCell, SourceMode, TimeSnapshot};
use crate::signals::{ClockKind, CpuId, Scheduler, TimerQueues};
use crate::VirtualTime;

/// Platform whose counter ticks once per nanosecond and only moves when told to.
pub(crate) struct ManualPlatform {
    page: Option<InfoPage>,
    counter: AtomicU64,
    core: AtomicUsize,
    host: AtomicU64,
    host_step: AtomicU64,
    tear_next: AtomicU32,
    migrate_next: AtomicU32,
    writer: Mutex<()>,
}

impl ManualPlatform {
    pub const BASE: u64 = 100_000_000_000;
    pub const INTERVAL_NS: u32 = 10_000_000;

    pub fn new(mode: SourceMode, cells: usize) -> Self {
        Self::with_page(Some(InfoPage::new(mode, cells, Self::anchored_at(Self::BASE))))
    }

    pub fn uninitialized() -> Self {
        Self::with_page(None)
    }

    fn with_page(page: Option<InfoPage>) -> Self {
        Self {
            page,
            counter: AtomicU64::new(Self::BASE),
            core: AtomicUsize::new(0),
            host: AtomicU64::new(0),
            host_step: AtomicU64::new(0),
            tear_next: AtomicU32::new(0),
            migrate_next: AtomicU32::new(0),
            writer: Mutex::new(()),
        }
    }

    fn anchored_at(counter: u64) -> TimeSnapshot {
        TimeSnapshot {
            counter,
            nano_anchor: counter,
            interval_counter: Self::INTERVAL_NS,
            interval_nanos: Self::INTERVAL_NS,
            transaction_id: 0,
        }
    }

    fn cells(&self) -> impl Iterator<Item = &SnapshotCell> + '_ {
        self.page
            .iter()
            .flat_map(|page| (0..page.len()).filter_map(move |core| page.cell(core)))
    }

    /// Moves the counter forward, recalibrating once a full interval has passed.
    pub fn advance(&self, nanos: u64) {
        let counter = self.counter.fetch_add(nanos, Ordering::SeqCst) + nanos;
        let _writer = self.writer.lock();
        for cell in self.cells() {
            if counter.saturating_sub(cell.read().counter) >= u64::from(Self::INTERVAL_NS) {
                cell.publish(&Self::anchored_at(counter));
            }
        }
    }

    /// Moves the counter back without touching the calibration.
    pub fn rewind(&self, nanos: u64) {
        self.counter.fetch_sub(nanos, Ordering::SeqCst);
    }

    /// Jumps both the counter and the calibration to `nanos`.
    pub fn recalibrate_to(&self, nanos: u64) {
        self.counter.store(nanos, Ordering::SeqCst);
        let _writer = self.writer.lock();
        for cell in self.cells() {
            cell.publish(&Self::anchored_at(nanos));
        }
    }

    pub fn tear_next_reads(&self, reads: u32) {
        self.tear_next.store(reads, Ordering::SeqCst);
    }

    pub fn migrate_next_reads(&self, reads: u32) {
        self.migrate_next.store(reads, Ordering::SeqCst);
    }

    pub fn pin_core(&self, core: usize) {
        self.core.store(core, Ordering::SeqCst);
    }

    pub fn set_host_nanos(&self, nanos: u64) {
        self.host.store(nanos, Ordering::SeqCst);
    }

    /// Makes every host timestamp read advance the host clock by `step`.
    pub fn host_step(&self, step: u64) {
        self.host_step.store(step, Ordering::SeqCst);
    }

    fn take(flag: &AtomicU32) -> bool {
        flag.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Platform for ManualPlatform {
    fn info_page(&self) -> Option<&InfoPage> {
        self.page.as_ref()
    }

    fn read_counter(&self) -> u64 {
        if Self::take(&self.tear_next) {
            let _writer = self.writer.lock();
            for cell in self.cells() {
                cell.publish(&cell.read());
            }
        }
        if Self::take(&self.migrate_next) {
            let cores = self.page.as_ref().map_or(1, InfoPage::len);
            let core = self.core.load(Ordering::SeqCst);
            self.core.store((core + 1) % cores, Ordering::SeqCst);
        }
        self.counter.load(Ordering::SeqCst)
    }

    fn current_core(&self) -> usize {
        self.core.load(Ordering::SeqCst)
    }

    fn host_nano_ts(&self) -> u64 {
        let step = self.host_step.load(Ordering::SeqCst);
        self.host.fetch_add(step, Ordering::SeqCst) + step
    }
}

pub(crate) struct RecordingScheduler {
    pending: Vec<AtomicBool>,
    sync_boundary: AtomicBool,
    resyncs: AtomicU64,
}

impl RecordingScheduler {
    pub fn new(cpus: usize) -> Self {
        Self {
            pending: (0..cpus).map(|_| AtomicBool::new(false)).collect(),
            sync_boundary: AtomicBool::new(false),
            resyncs: AtomicU64::new(0),
        }
    }

    pub fn is_pending(&self, cpu: CpuId) -> bool {
        self.timer_pending(cpu)
    }

    pub fn sync_boundary_raised(&self) -> bool {
        self.sync_boundary.load(Ordering::SeqCst)
    }

    pub fn resync_requests(&self) -> u64 {
        self.resyncs.load(Ordering::SeqCst)
    }
}

impl Scheduler for RecordingScheduler {
    fn timer_pending(&self, cpu: CpuId) -> bool {
        self.pending
            .get(cpu.0 as usize)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn raise_timer_pending(&self, cpu: CpuId) {
        if let Some(flag) = self.pending.get(cpu.0 as usize) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn raise_sync_boundary(&self) {
        self.sync_boundary.store(true, Ordering::SeqCst);
    }

    fn request_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct ManualQueues {
    virtual_expiry: AtomicU64,
    sync_expiry: AtomicU64,
    draining: AtomicBool,
}

impl ManualQueues {
    pub fn new() -> Self {
        Self {
            virtual_expiry: AtomicU64::new(u64::MAX),
            sync_expiry: AtomicU64::new(u64::MAX),
            draining: AtomicBool::new(false),
        }
    }

    pub fn set_expiry(&self, clock: ClockKind, expiry: u64) {
        match clock {
            ClockKind::Virtual => self.virtual_expiry.store(expiry, Ordering::SeqCst),
            ClockKind::VirtualSync => self.sync_expiry.store(expiry, Ordering::SeqCst),
        }
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
    }
}

impl TimerQueues for ManualQueues {
    fn head_expiry(&self, clock: ClockKind) -> u64 {
        match clock {
            ClockKind::Virtual => self.virtual_expiry.load(Ordering::SeqCst),
            ClockKind::VirtualSync => self.sync_expiry.load(Ordering::SeqCst),
        }
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

pub(crate) fn config(vcpus: u32) -> VtimeConfig {
    let mut config = VtimeConfig::default();
    config.clock.vcpu_count = vcpus;
    config.clock.timer_cpu = 0;
    config.clock.raw_source = RawSourceKind::Computed;
    config
}

pub(crate) struct Harness {
    pub platform: Arc<ManualPlatform>,
    pub scheduler: Arc<RecordingScheduler>,
    pub queues: Arc<ManualQueues>,
    pub time: VirtualTime,
}

impl Harness {
    pub fn new(vcpus: u32) -> Self {
        let platform = Arc::new(ManualPlatform::new(SourceMode::Synchronous, 1));
        let scheduler = Arc::new(RecordingScheduler::new(vcpus as usize));
        let queues = Arc::new(ManualQueues::new());
        let time = VirtualTime::new(
            &config(vcpus),
            platform.clone(),
            scheduler.clone(),
            queues.clone(),
        )
        .expect("test config is valid");
        Self {
            platform,
            scheduler,
            queues,
            time,
        }
    }
}
