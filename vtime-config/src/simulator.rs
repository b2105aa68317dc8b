//! Simulated platform configuration.
//!
//! Drives the deterministic platform in `vtime-simulator`: how many cores publish
//! calibration data, how fast their counters tick, how far apart their anchors are,
//! and how often reads are disturbed.
use std::path::Path;
use std::path::PathBuf;

use figment::providers::Format;
use figment::providers::Yaml;
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;
use crate::ConfigError;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = "validation::validate_interval_counter"))]
pub struct SimulatorConfig {
    /// Number of simulated host cores, each with its own counter and snapshot.
    #[serde(default = "default_cores")]
    #[validate(range(min = 1, max = 256))]
    pub cores: usize,
    /// Counter frequency in Hz.
    #[serde(default = "default_counter_hz")]
    #[validate(range(min = 1_000_000, max = 100_000_000_000u64))]
    pub counter_hz: u64,
    /// Interval between snapshot recalibrations, in nanoseconds.
    #[serde(default = "default_update_interval")]
    #[validate(range(min = 1_000, max = 1_000_000_000))]
    pub update_interval_ns: u32,
    /// Largest per-core nanosecond anchor skew (cores disagree by up to this much).
    #[serde(default)]
    pub max_core_skew_ns: u64,
    /// Seed for deterministic skew and chaos.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Read disturbance configuration.
    #[serde(default)]
    #[validate(nested)]
    pub chaos: ChaosConfig,
}

fn default_cores() -> usize {
    2
}

fn default_counter_hz() -> u64 {
    3_000_000_000
}

fn default_update_interval() -> u32 {
    10_000_000
}

fn default_seed() -> u64 {
    42
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            cores: default_cores(),
            counter_hz: default_counter_hz(),
            update_interval_ns: default_update_interval(),
            max_core_skew_ns: 0,
            seed: default_seed(),
            chaos: ChaosConfig::default(),
        }
    }
}

impl SimulatorConfig {
    /// Load only the simulator section from a standalone YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Counter ticks per recalibration interval.
    pub fn interval_counter(&self) -> u64 {
        (u128::from(self.counter_hz) * u128::from(self.update_interval_ns) / 1_000_000_000) as u64
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ChaosConfig {
    /// Probability that a snapshot is republished in the middle of a read.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub torn_read_probability: f64,
    /// Probability that the reading thread migrates to another core mid-read.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub migrate_probability: f64,
}
