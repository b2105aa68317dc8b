//! Synchronized clock catch-up policy.
//!
//! When the synchronized clock is re-armed after being held at a timer boundary, the
//! accumulated lag decides what happens next:
//! - small lags are carried without catch-up
//! - medium lags are worked off at a percentage picked from `catch_up_periods`
//! - huge lags are given up on entirely

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// One row of the catch-up table: lags of at least `start_ns` run `percentage`
/// faster than the primary clock until caught up.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpPeriod {
    pub start_ns: u64,
    pub percentage: u32,
}

impl CatchUpPeriod {
    const fn new(start_ns: u64, percentage: u32) -> Self {
        Self {
            start_ns,
            percentage,
        }
    }
}

/// Synchronized clock configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SyncConfig {
    /// Lags below this are carried without starting catch-up.
    #[serde(default = "default_start_threshold")]
    pub catch_up_start_threshold_ns: u64,

    /// Lags above this are given up on.
    #[serde(default = "default_give_up_threshold")]
    #[validate(range(min = 1_000_000))]
    pub give_up_threshold_ns: u64,

    /// Catch-up table, ordered by `start_ns`.
    #[serde(default = "default_periods")]
    #[validate(custom(function = validation::validate_catch_up_periods))]
    pub catch_up_periods: Vec<CatchUpPeriod>,
}

impl SyncConfig {
    /// Catch-up percentage for `lag`, or `None` when the lag is too small to bother.
    pub fn percentage_for(&self, lag: u64) -> Option<u32> {
        if lag < self.catch_up_start_threshold_ns {
            return None;
        }
        self.catch_up_periods
            .iter()
            .rev()
            .find(|period| period.start_ns <= lag)
            .or_else(|| self.catch_up_periods.first())
            .map(|period| period.percentage)
    }
}

fn default_start_threshold() -> u64 {
    750_000
}

fn default_give_up_threshold() -> u64 {
    60_000_000_000
}

fn default_periods() -> Vec<CatchUpPeriod> {
    vec![
        CatchUpPeriod::new(750_000, 5),
        CatchUpPeriod::new(1_500_000, 10),
        CatchUpPeriod::new(8_000_000, 25),
        CatchUpPeriod::new(30_000_000, 50),
        CatchUpPeriod::new(100_000_000, 75),
        CatchUpPeriod::new(175_000_000, 100),
        CatchUpPeriod::new(500_000_000, 200),
        CatchUpPeriod::new(3_000_000_000, 300),
        CatchUpPeriod::new(30_000_000_000, 400),
        CatchUpPeriod::new(55_000_000_000, 500),
    ]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            catch_up_start_threshold_ns: default_start_threshold(),
            give_up_threshold_ns: default_give_up_threshold(),
            catch_up_periods: default_periods(),
        }
    }
}
