//! Consistent reads of the host calibration data.

use tracing::error;

use crate::platform::{Platform, SourceMode, TimeSnapshot};
use crate::stats::ClockStats;

/// A snapshot together with the counter value read under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceReading {
    pub snapshot: TimeSnapshot,
    pub counter_now: u64,
}

/// Reads the calibration snapshot for the calling core plus the current counter.
///
/// Retries until the snapshot was not updated during the read and, in per-core
/// mode, the caller did not migrate to another core in between.
///
/// # Panics
/// If the platform never published an info page.
pub fn read_snapshot(platform: &dyn Platform, stats: &ClockStats) -> SourceReading {
    let Some(page) = platform.info_page() else {
        panic!("virtual time read before the host info page was set up");
    };

    loop {
        let (cell, core) = match page.mode() {
            SourceMode::Synchronous => (page.primary_cell(), None),
            SourceMode::PerCore => {
                let core = platform.current_core();
                let cell = page.cell(core).unwrap_or_else(|| {
                    error!(core, cells = page.len(), "core has no snapshot cell");
                    page.primary_cell()
                });
                (cell, Some(core))
            }
        };

        let snapshot = cell.read();
        let counter_now = platform.read_counter();

        let migrated = core.is_some_and(|core| platform.current_core() != core);
        if migrated || !cell.is_current(snapshot.transaction_id) {
            stats.record_torn_read();
            continue;
        }

        return SourceReading {
            snapshot,
            counter_now,
        };
    }
}
