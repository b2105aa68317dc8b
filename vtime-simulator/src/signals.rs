//! Scheduler and timer queue stand-ins that record what the clocks ask of them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::trace;
use vtime_core::signals::{ClockKind, CpuId, Scheduler, TimerQueues};

#[derive(Debug)]
pub struct RecordingScheduler {
    pending: Box<[AtomicBool]>,
    timer_raises: AtomicU64,
    sync_boundaries: AtomicU64,
    resyncs: AtomicU64,
}

impl RecordingScheduler {
    pub fn new(vcpus: usize) -> Self {
        Self {
            pending: (0..vcpus).map(|_| AtomicBool::new(false)).collect(),
            timer_raises: AtomicU64::new(0),
            sync_boundaries: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
        }
    }

    /// Consumes `cpu`'s pending flag, as the vCPU loop would before running timers.
    pub fn take_pending(&self, cpu: CpuId) -> bool {
        self.pending
            .get(cpu.0 as usize)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    pub fn timer_raises(&self) -> u64 {
        self.timer_raises.load(Ordering::Relaxed)
    }

    pub fn sync_boundaries(&self) -> u64 {
        self.sync_boundaries.load(Ordering::Relaxed)
    }

    pub fn resync_requests(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }
}

impl Scheduler for RecordingScheduler {
    fn timer_pending(&self, cpu: CpuId) -> bool {
        self.pending
            .get(cpu.0 as usize)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn raise_timer_pending(&self, cpu: CpuId) {
        if let Some(flag) = self.pending.get(cpu.0 as usize) {
            if !flag.swap(true, Ordering::AcqRel) {
                self.timer_raises.fetch_add(1, Ordering::Relaxed);
                trace!(%cpu, "woken for pending timers");
            }
        }
    }

    fn raise_sync_boundary(&self) {
        self.sync_boundaries.fetch_add(1, Ordering::Relaxed);
    }

    fn request_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }
}

/// Timer queues reduced to their head expiries.
#[derive(Debug)]
pub struct ManualTimerQueues {
    virtual_head: AtomicU64,
    sync_head: AtomicU64,
    draining: AtomicBool,
}

impl Default for ManualTimerQueues {
    fn default() -> Self {
        Self {
            virtual_head: AtomicU64::new(u64::MAX),
            sync_head: AtomicU64::new(u64::MAX),
            draining: AtomicBool::new(false),
        }
    }
}

impl ManualTimerQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the earliest expiry on `clock`; `u64::MAX` empties the queue.
    pub fn arm(&self, clock: ClockKind, expiry: u64) {
        match clock {
            ClockKind::Virtual => self.virtual_head.store(expiry, Ordering::Release),
            ClockKind::VirtualSync => self.sync_head.store(expiry, Ordering::Release),
        }
    }

    pub fn disarm(&self, clock: ClockKind) {
        self.arm(clock, u64::MAX);
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Release);
    }
}

impl TimerQueues for ManualTimerQueues {
    fn head_expiry(&self, clock: ClockKind) -> u64 {
        match clock {
            ClockKind::Virtual => self.virtual_head.load(Ordering::Acquire),
            ClockKind::VirtualSync => self.sync_head.load(Ordering::Acquire),
        }
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_is_idempotent_until_taken() {
        let scheduler = RecordingScheduler::new(2);
        scheduler.raise_timer_pending(CpuId(1));
        scheduler.raise_timer_pending(CpuId(1));
        assert_eq!(scheduler.timer_raises(), 1);
        assert!(scheduler.timer_pending(CpuId(1)));
        assert!(!scheduler.timer_pending(CpuId(0)));

        assert!(scheduler.take_pending(CpuId(1)));
        assert!(!scheduler.take_pending(CpuId(1)));
        scheduler.raise_timer_pending(CpuId(1));
        assert_eq!(scheduler.timer_raises(), 2);
    }

    #[test]
    fn queues_start_empty() {
        let queues = ManualTimerQueues::new();
        assert_eq!(queues.head_expiry(ClockKind::Virtual), u64::MAX);
        queues.arm(ClockKind::VirtualSync, 5);
        assert_eq!(queues.head_expiry(ClockKind::VirtualSync), 5);
        queues.disarm(ClockKind::VirtualSync);
        assert_eq!(queues.head_expiry(ClockKind::VirtualSync), u64::MAX);
    }
}
