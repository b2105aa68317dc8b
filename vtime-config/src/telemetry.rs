//! Observability configuration.
//!
//! Parameters for the tracing subscriber and the prometheus exporter.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    #[validate(length(min = 1))]
    pub log_filter: String,

    /// Include thread names in log lines (one thread per virtual CPU).
    #[serde(default = "default_true")]
    pub thread_names: bool,

    /// Prefix for exported metric names.
    #[serde(default = "default_metrics_prefix")]
    #[validate(custom(function = validation::validate_metric_prefix))]
    pub metrics_prefix: String,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

fn default_metrics_prefix() -> String {
    "vtime".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            thread_names: default_true(),
            metrics_prefix: default_metrics_prefix(),
        }
    }
}
