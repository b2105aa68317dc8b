//! ## vtime-core::stats
//! **Clock event counters**
//!
//! Relaxed atomic counters bumped from the hot paths. Exported through
//! [`ClockStats::snapshot`] for logging and metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for everything noteworthy the clocks do.
#[derive(Debug, Default)]
pub struct ClockStats {
    torn_reads: AtomicU64,
    regressions: AtomicU64,
    anomalies: AtomicU64,
    cas_give_ups: AtomicU64,
    catch_up_steps: AtomicU64,
    catch_up_skipped: AtomicU64,
    catch_up_completed: AtomicU64,
    sync_give_ups: AtomicU64,
    sync_clamps: AtomicU64,
    timer_raises: AtomicU64,
    resumes: AtomicU64,
    pauses: AtomicU64,
}

/// Point-in-time copy of [`ClockStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub torn_reads: u64,
    pub regressions: u64,
    pub anomalies: u64,
    pub cas_give_ups: u64,
    pub catch_up_steps: u64,
    pub catch_up_skipped: u64,
    pub catch_up_completed: u64,
    pub sync_give_ups: u64,
    pub sync_clamps: u64,
    pub timer_raises: u64,
    pub resumes: u64,
    pub pauses: u64,
}

macro_rules! counters {
    ($($record:ident => $field:ident),* $(,)?) => {
        impl ClockStats {
            $(
                #[inline]
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    record_torn_read => torn_reads,
    record_regression => regressions,
    record_anomaly => anomalies,
    record_cas_give_up => cas_give_ups,
    record_catch_up_step => catch_up_steps,
    record_catch_up_skipped => catch_up_skipped,
    record_catch_up_completed => catch_up_completed,
    record_sync_give_up => sync_give_ups,
    record_sync_clamp => sync_clamps,
    record_timer_raise => timer_raises,
    record_resume => resumes,
    record_pause => pauses,
}

impl ClockStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsSnapshot {
    /// Name/value pairs in a stable order, for exporters.
    pub fn entries(&self) -> [(&'static str, u64); 12] {
        [
            ("torn_reads", self.torn_reads),
            ("regressions", self.regressions),
            ("anomalies", self.anomalies),
            ("cas_give_ups", self.cas_give_ups),
            ("catch_up_steps", self.catch_up_steps),
            ("catch_up_skipped", self.catch_up_skipped),
            ("catch_up_completed", self.catch_up_completed),
            ("sync_give_ups", self.sync_give_ups),
            ("sync_clamps", self.sync_clamps),
            ("timer_raises", self.timer_raises),
            ("resumes", self.resumes),
            ("pauses", self.pauses),
        ]
    }
}
