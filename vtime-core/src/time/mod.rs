//! ## vtime-core::time
//! **Guest virtual clocks**
//!
//! Layered from the bottom up:
//! - `reader`: consistent snapshot reads from the host info page
//! - `raw`: the monotonic raw nanosecond clock shared by all callers
//! - `warp`: optional speed scaling of the raw clock
//! - `primary`: the pausable virtual clock
//! - `sync`: the synchronized clock that trails the primary by a lag
//! - `convert`: clock-frequency conversions

pub mod convert;
pub mod primary;
pub mod raw;
pub mod reader;
pub mod sync;
pub mod warp;

pub use primary::PrimaryClock;
pub use raw::{GipNanoSource, HostNanoSource, NanoSource, RawClock};
pub use sync::SyncClock;
pub use warp::WarpDrive;

/// Whether a clock advances with the host or holds a frozen value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Ticking,
    Stopped(u64),
}

impl ClockState {
    pub fn is_ticking(self) -> bool {
        matches!(self, ClockState::Ticking)
    }
}
