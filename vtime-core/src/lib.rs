//! # vtime-core
//!
//! Guest-visible virtual time for a hypervisor.
//! Built for many virtual CPU threads reading the clocks concurrently.
//!
//! ### Expectations:
//! - Clock reads never block and never fail
//! - Time never goes backwards while the clocks tick
//! - Pause/resume and catch-up control serialize on one short lock
//!
//! ### Key Submodules:
//! - `platform`: host calibration snapshots and counters
//! - `signals`: timer queues and scheduler seen from the clocks
//! - `time`: raw clock, warp drive, primary and synchronized clocks
//! - `context`: `VirtualTime`, the per-VM context tying them together
//! - `stats`: event counters exported to telemetry

pub mod context;
pub mod error;
pub mod platform;
pub mod signals;
pub mod stats;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

pub mod prelude {
    pub use crate::context::*;
    pub use crate::error::*;
    pub use crate::platform::*;
    pub use crate::signals::*;
    pub use crate::stats::*;
    pub use crate::time::ClockState;
}

pub use context::{ClockAccess, VirtualTime};
pub use error::TimeError;
