//! # vtime Telemetry
//!
//! Logging setup and prometheus export for the virtual clocks.

pub mod logging;
pub mod metrics;

pub use logging::ClockLogger;
pub use metrics::MetricsRecorder;
