//! ## vtime-telemetry::logging
//! **Subscriber setup and periodic clock reports**
//!
//! `RUST_LOG` wins over the configured filter so a running VM can be
//! debugged without editing its configuration.

use tracing::{info, info_span};
use tracing_subscriber::{fmt, EnvFilter};
use vtime_config::TelemetryConfig;
use vtime_core::VirtualTime;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct ClockLogger;

impl ClockLogger {
    /// Installs the global subscriber. Panics if one is already installed.
    pub fn init(config: &TelemetryConfig) {
        fmt()
            .with_env_filter(Self::filter(config))
            .with_thread_names(config.thread_names)
            .init()
    }

    pub fn try_init(config: &TelemetryConfig) -> Result<(), InitError> {
        fmt()
            .with_env_filter(Self::filter(config))
            .with_thread_names(config.thread_names)
            .try_init()
    }

    fn filter(config: &TelemetryConfig) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    }

    /// Emits one info event summarizing both clocks and the counters.
    pub fn log_report(time: &VirtualTime) {
        let _span = info_span!("vtime_report", timer_cpu = %time.timer_cpu()).entered();
        let stats = time.stats();
        info!(
            primary = ?time.primary_state(),
            sync = ?time.sync_state(),
            lag_ns = time.lag(),
            catch_up_percent = time.catch_up_percent(),
            warp_percent = time.warp_drive(),
            torn_reads = stats.torn_reads,
            regressions = stats.regressions,
            anomalies = stats.anomalies,
            cas_give_ups = stats.cas_give_ups,
            "Virtual time report"
        );
    }
}
