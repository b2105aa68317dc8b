//! Multi-threaded read scenarios.
//!
//! A scenario describes how many simulated vCPU threads hammer the clocks,
//! how often, and how far their core's counter moves between reads.
//! Scenarios are plain YAML:
//!
//! ```yaml
//! threads: 2
//! calls_per_thread: 1000
//! step_ns: 1000000
//! clock: virtual
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use vtime_core::stats::StatsSnapshot;
use vtime_core::ClockAccess;

use crate::SimulationError;

/// Which clock the threads read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioClock {
    #[default]
    Virtual,
    Sync,
}

impl ScenarioClock {
    #[inline]
    pub fn read(self, access: &ClockAccess<'_>) -> u64 {
        match self {
            ScenarioClock::Virtual => access.primary_now(),
            ScenarioClock::Sync => access.sync_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub threads: usize,
    pub calls_per_thread: u64,
    pub step_ns: u64,
    #[serde(default)]
    pub clock: ScenarioClock,
}

impl Default for Scenario {
    /// Two vCPUs reading a thousand times each, one millisecond apart.
    fn default() -> Self {
        Self {
            threads: 2,
            calls_per_thread: 1_000,
            step_ns: 1_000_000,
            clock: ScenarioClock::Virtual,
        }
    }
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SimulationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a scenario from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SimulationError::FileNotFound(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Every thread is a vCPU, so there can be no more threads than vCPUs
    /// that are not already running.
    pub fn check(&self, idle_vcpus: u32) -> Result<(), SimulationError> {
        if self.threads == 0 {
            return Err(SimulationError::InvalidScenario(
                "at least one thread is required".into(),
            ));
        }
        if self.threads > idle_vcpus as usize {
            return Err(SimulationError::InvalidScenario(format!(
                "{} threads but only {} idle virtual CPUs",
                self.threads, idle_vcpus
            )));
        }
        Ok(())
    }
}

/// What a scenario run observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Clock value before the threads started.
    pub initial: u64,
    /// Largest value any thread read.
    pub max: u64,
    pub calls: u64,
    /// Reads that returned less than a value already returned before them.
    pub violations: u64,
    pub stats: StatsSnapshot,
}

/// Cross-thread record of the highest value returned so far.
#[derive(Debug)]
pub(crate) struct Observer {
    high_water: AtomicU64,
    violations: AtomicU64,
    calls: AtomicU64,
}

impl Observer {
    pub fn new(initial: u64) -> Self {
        Self {
            high_water: AtomicU64::new(initial),
            violations: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Highest value whose read has completed.
    #[inline]
    pub fn floor(&self) -> u64 {
        self.high_water.load(Ordering::Acquire)
    }

    /// Records `value`, read by a call that started after `floor` was observed.
    #[inline]
    pub fn observe(&self, floor: u64, previous: u64, value: u64) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.high_water.fetch_max(value, Ordering::AcqRel);
        let ordered = value >= floor && value >= previous;
        if !ordered {
            self.violations.fetch_add(1, Ordering::Relaxed);
        }
        ordered
    }

    pub fn report(&self, initial: u64, stats: StatsSnapshot) -> ScenarioReport {
        ScenarioReport {
            initial,
            max: self.high_water.load(Ordering::Acquire),
            calls: self.calls.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            stats,
        }
    }
}
