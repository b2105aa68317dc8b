use thiserror::Error;
use vtime_config::ConfigError;

#[derive(Debug, Error)]
pub enum TimeError {
    /// More pauses than resumes, or more resumes than virtual CPUs.
    #[error("internal error: {op} with {ticking} ticking references and {vcpus} virtual CPUs")]
    RefCountViolation {
        op: &'static str,
        ticking: u32,
        vcpus: u32,
    },

    #[error("warp drive percentage {0} outside 2..=20000")]
    InvalidWarpPercentage(u32),

    #[error("warp drive can only be changed while the virtual clock is paused")]
    WarpWhileTicking,

    #[error("catch-up percentage {0} outside 1..=10000")]
    InvalidCatchUpPercentage(u32),

    #[error("virtual clock is paused")]
    PrimaryStopped,

    #[error("timer CPU {cpu} does not exist, the VM has {vcpus} virtual CPUs")]
    InvalidTimerCpu { cpu: u32, vcpus: u32 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
