//! # vtime Configuration System
//!
//! Hierarchical configuration for the virtual time subsystem.
//!
//! ## Features
//! - **Unified Configuration**: one document for the clocks, the catch-up policy,
//!   telemetry and the simulated platform
//! - **Validation**: ranges, cross-field checks and catch-up table sanity are enforced
//!   before a `VirtualTime` is ever built
//! - **Environment Awareness**: per-environment YAML overrides and `VTIME_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod clock;
mod error;
mod simulator;
mod sync;
mod telemetry;
mod validation;

pub use clock::{ClockConfig, RawSourceKind};
pub use error::ConfigError;
pub use simulator::{ChaosConfig, SimulatorConfig};
pub use sync::{CatchUpPeriod, SyncConfig};
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/vtime.yaml";
const ENV_PREFIX: &str = "VTIME_";

/// Top-level configuration container for every vtime component.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct VtimeConfig {
    /// Raw clock and primary clock parameters.
    #[serde(default)]
    #[validate(nested)]
    pub clock: ClockConfig,

    /// Synchronized clock catch-up policy.
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,

    /// Logging and metrics.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Simulated platform used by tests, benches and scenarios.
    #[serde(default)]
    #[validate(nested)]
    pub simulator: SimulatorConfig,
}

impl VtimeConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/vtime.yaml`, skipped when missing
    /// 3. `config/<VTIME_ENV>.yaml` (`production` unless set)
    /// 4. `VTIME_*` environment variables, nested with `__`
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(VtimeConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("VTIME_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract_validated(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from a specific file, still honouring `VTIME_*` overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(VtimeConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract_validated(figment)
    }

    fn extract_validated(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
