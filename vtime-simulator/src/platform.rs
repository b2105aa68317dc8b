//! The simulated host: per-core counters, their calibration page and chaos.

use std::cell::Cell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;
use vtime_config::SimulatorConfig;
use vtime_core::platform::{InfoPage, Platform, SourceMode};

use crate::chaos::{chaos_model, ChaosModel};
use crate::core_clock::CoreClock;

/// Host time at which every simulated core starts.
pub const START_NS: u64 = 1_000_000_000;

thread_local! {
    static PINNED_CORE: Cell<usize> = const { Cell::new(0) };
}

pub struct SimulatedPlatform {
    page: InfoPage,
    cores: Box<[CoreClock]>,
    chaos: Box<dyn ChaosModel>,
}

impl SimulatedPlatform {
    pub fn new(config: &SimulatorConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let interval_counter = u32::try_from(config.interval_counter()).unwrap_or(u32::MAX);
        let cores: Box<[CoreClock]> = (0..config.cores.max(1))
            .map(|core| {
                let skew_ns = if core == 0 || config.max_core_skew_ns == 0 {
                    0
                } else {
                    rng.random_range(0..=config.max_core_skew_ns)
                };
                CoreClock::new(
                    START_NS,
                    config.counter_hz,
                    skew_ns,
                    interval_counter,
                    config.update_interval_ns,
                )
            })
            .collect();

        let mode = if cores.len() > 1 {
            SourceMode::PerCore
        } else {
            SourceMode::Synchronous
        };
        let page = InfoPage::new(mode, cores.len(), cores[0].snapshot());
        for (core, clock) in cores.iter().enumerate().skip(1) {
            if let Some(cell) = page.cell(core) {
                cell.publish(&clock.snapshot());
            }
        }
        debug!(
            cores = cores.len(),
            ?mode,
            counter_hz = config.counter_hz,
            "simulated platform ready"
        );

        Self {
            page,
            cores,
            chaos: chaos_model(&config.chaos, config.seed.wrapping_add(1)),
        }
    }

    pub fn cores(&self) -> usize {
        self.cores.len()
    }

    pub fn core(&self, core: usize) -> Option<&CoreClock> {
        self.cores.get(core)
    }

    /// Binds the calling thread to `core` for counter reads.
    pub fn pin_current_thread(core: usize) {
        PINNED_CORE.with(|pinned| pinned.set(core));
    }

    /// Runs `core`'s counter forward by `ns` nanoseconds.
    pub fn advance_core(&self, core: usize, ns: u64) {
        if let (Some(clock), Some(cell)) = (self.cores.get(core), self.page.cell(core)) {
            clock.advance(ns, cell);
        }
    }

    /// Runs every core forward by `ns` nanoseconds.
    pub fn advance_all(&self, ns: u64) {
        for core in 0..self.cores.len() {
            self.advance_core(core, ns);
        }
    }

    fn pinned(&self) -> usize {
        PINNED_CORE.with(Cell::get) % self.cores.len()
    }
}

impl Platform for SimulatedPlatform {
    fn info_page(&self) -> Option<&InfoPage> {
        Some(&self.page)
    }

    fn read_counter(&self) -> u64 {
        let core = self.pinned();
        if self.chaos.tear_read() {
            if let Some(cell) = self.page.cell(core) {
                self.cores[core].republish(cell);
            }
        }
        let counter = self.cores[core].counter();
        if self.chaos.migrate() {
            Self::pin_current_thread((core + 1) % self.cores.len());
        }
        counter
    }

    fn current_core(&self) -> usize {
        self.pinned()
    }

    fn host_nano_ts(&self) -> u64 {
        self.cores[self.pinned()].now_ns()
    }
}
