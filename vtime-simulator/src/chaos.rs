//! # Chaos models for the simulated platform
//!
//! Fault injection aimed at the time source reader:
//! - torn reads: the calibration is republished while a reader is mid-read
//! - migrations: the reading thread hops to another core mid-read
//!
//! ## Models:
//! - `ProbabilisticChaos`: fires each fault with a configured probability
//! - `NoChaos`: never fires

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use vtime_config::ChaosConfig;

pub trait ChaosModel: Send + Sync {
    /// Whether the next counter read should race with a calibration update.
    fn tear_read(&self) -> bool;

    /// Whether the reading thread should move to another core.
    fn migrate(&self) -> bool;
}

#[derive(Debug)]
pub struct ProbabilisticChaos {
    torn_read_probability: f64,
    migrate_probability: f64,
    rng: Mutex<SmallRng>,
}

impl ProbabilisticChaos {
    /// # Panics
    /// Panics if either probability is outside 0.0..=1.0.
    pub fn new(torn_read_probability: f64, migrate_probability: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&torn_read_probability)
                && (0.0..=1.0).contains(&migrate_probability),
            "Chaos probabilities must be between 0.0 and 1.0"
        );
        Self {
            torn_read_probability,
            migrate_probability,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl ChaosModel for ProbabilisticChaos {
    #[inline]
    fn tear_read(&self) -> bool {
        self.rng.lock().random_bool(self.torn_read_probability)
    }

    #[inline]
    fn migrate(&self) -> bool {
        self.rng.lock().random_bool(self.migrate_probability)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoChaos;

impl ChaosModel for NoChaos {
    #[inline]
    fn tear_read(&self) -> bool {
        false
    }

    #[inline]
    fn migrate(&self) -> bool {
        false
    }
}

/// `NoChaos` unless the configuration enables a fault.
pub fn chaos_model(config: &ChaosConfig, seed: u64) -> Box<dyn ChaosModel> {
    if config.torn_read_probability > 0.0 || config.migrate_probability > 0.0 {
        Box::new(ProbabilisticChaos::new(
            config.torn_read_probability,
            config.migrate_probability,
            seed,
        ))
    } else {
        Box::new(NoChaos)
    }
}
