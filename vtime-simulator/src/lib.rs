/*!
# vtime Simulator

Deterministic host simulation for the virtual clocks. Runs a real
[`VirtualTime`] on top of simulated per-core counters, so monotonicity,
catch-up and timer signalling can be exercised from many threads without a
hypervisor.

## Key Components:
- **Core clocks:** per-core counters with their own calibration and optional skew.
- **Simulated platform:** the info page, thread-to-core pinning and counter reads.
- **Chaos:** seeded torn reads and core migrations.
- **Signals:** a recording scheduler and hand-armed timer queues.
- **Scenarios:** YAML-described multi-threaded read runs with a monotonicity report.
*/

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use vtime_config::VtimeConfig;
use vtime_core::signals::{Caller, CpuId};
use vtime_core::VirtualTime;

pub mod chaos;
pub mod core_clock;
pub mod error;
pub mod platform;
pub mod scenario;
pub mod signals;

pub use error::SimulationError;
pub use platform::SimulatedPlatform;
pub use scenario::{Scenario, ScenarioClock, ScenarioReport};
pub use signals::{ManualTimerQueues, RecordingScheduler};

use scenario::Observer;

/// A virtual machine's clocks wired to a simulated host.
pub struct Simulator {
    platform: Arc<SimulatedPlatform>,
    scheduler: Arc<RecordingScheduler>,
    queues: Arc<ManualTimerQueues>,
    time: VirtualTime,
    vcpus: u32,
}

impl Simulator {
    pub fn new(config: &VtimeConfig) -> Result<Self, SimulationError> {
        let platform = Arc::new(SimulatedPlatform::new(&config.simulator));
        let scheduler = Arc::new(RecordingScheduler::new(config.clock.vcpu_count as usize));
        let queues = Arc::new(ManualTimerQueues::new());
        let time = VirtualTime::new(config, platform.clone(), scheduler.clone(), queues.clone())?;
        Ok(Self {
            platform,
            scheduler,
            queues,
            time,
            vcpus: config.clock.vcpu_count,
        })
    }

    /// Builds a simulator from a configuration file (plus `VTIME_*` overrides).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        Self::new(&VtimeConfig::load_from_path(path)?)
    }

    pub fn time(&self) -> &VirtualTime {
        &self.time
    }

    pub fn platform(&self) -> &SimulatedPlatform {
        &self.platform
    }

    pub fn scheduler(&self) -> &RecordingScheduler {
        &self.scheduler
    }

    pub fn queues(&self) -> &ManualTimerQueues {
        &self.queues
    }

    /// Resumes the clock once per scenario thread, lets every thread read
    /// `calls_per_thread` times while its core advances, then pauses again.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, SimulationError> {
        let idle = self.vcpus.saturating_sub(self.time.ticking_count());
        scenario.check(idle)?;

        let initial = match scenario.clock {
            ScenarioClock::Virtual => self.time.primary_now_no_check(),
            ScenarioClock::Sync => self.time.sync_now_no_check(),
        };
        for resumed in 0..scenario.threads {
            if let Err(err) = self.time.resume() {
                for _ in 0..resumed {
                    self.time.pause()?;
                }
                return Err(err.into());
            }
        }

        let observer = Observer::new(initial);
        let cores = self.platform.cores();
        let outcome = crossbeam::thread::scope(|s| {
            for thread in 0..scenario.threads {
                let observer = &observer;
                s.spawn(move |_| {
                    let core = thread % cores;
                    SimulatedPlatform::pin_current_thread(core);
                    let access = self.time.access(Caller::Vcpu(CpuId(thread as u32)));
                    let mut previous = 0;
                    for _ in 0..scenario.calls_per_thread {
                        let floor = observer.floor();
                        self.platform.advance_core(core, scenario.step_ns);
                        let value = scenario.clock.read(&access);
                        if !observer.observe(floor, previous, value) {
                            warn!(thread, value, floor, previous, "clock went backwards");
                        }
                        previous = value;
                    }
                });
            }
        });

        for _ in 0..scenario.threads {
            self.time.pause()?;
        }
        outcome.map_err(|_| SimulationError::ThreadPanicked)?;

        let report = observer.report(initial, self.time.stats());
        info!(
            initial = report.initial,
            max = report.max,
            calls = report.calls,
            violations = report.violations,
            "scenario finished"
        );
        Ok(report)
    }
}
