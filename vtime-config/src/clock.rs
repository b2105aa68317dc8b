//! Raw and primary clock parameters.
//!
//! Controls how the raw nanosecond timestamp is produced and how hard the
//! lock-free publication loop tries before a caller gives up.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Where candidate raw timestamps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RawSourceKind {
    /// Compute from the info page snapshot and a fresh counter read.
    #[default]
    Computed,
    /// Delegate to the host-provided nanosecond primitive.
    Host,
}

/// Raw clock and primary clock configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = "validation::validate_clock_topology"))]
pub struct ClockConfig {
    /// Number of virtual CPUs; bounds the ticking reference count.
    #[serde(default = "default_vcpu_count")]
    #[validate(range(min = 1, max = 1024))]
    pub vcpu_count: u32,

    /// Virtual CPU that owns timer processing.
    #[serde(default)]
    pub timer_cpu: u32,

    /// Raw timestamp strategy.
    #[serde(default)]
    pub raw_source: RawSourceKind,

    /// Attempts made to publish a raw timestamp after the first CAS fails.
    #[serde(default = "default_cas_retry_limit")]
    #[validate(range(min = 1, max = 10_000))]
    pub cas_retry_limit: u32,

    /// Callers that do not own the timer CPU stop retrying once fewer than this
    /// many attempts remain.
    #[serde(default = "default_cas_early_exit_below")]
    pub cas_early_exit_below: u32,

    /// Warp drive percentage applied to elapsed raw time (100 = real time).
    #[serde(default = "default_warp_percentage")]
    #[validate(range(min = 2, max = 20_000))]
    pub warp_percentage: u32,
}

fn default_vcpu_count() -> u32 {
    (num_cpus::get() as u32).clamp(1, 1024)
}

fn default_cas_retry_limit() -> u32 {
    50
}

fn default_cas_early_exit_below() -> u32 {
    25
}

fn default_warp_percentage() -> u32 {
    100
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            vcpu_count: default_vcpu_count(),
            timer_cpu: 0,
            raw_source: RawSourceKind::default(),
            cas_retry_limit: default_cas_retry_limit(),
            cas_early_exit_below: default_cas_early_exit_below(),
            warp_percentage: default_warp_percentage(),
        }
    }
}
