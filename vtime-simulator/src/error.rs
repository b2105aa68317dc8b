use thiserror::Error;
use vtime_config::ConfigError;
use vtime_core::TimeError;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Time error: {0}")]
    Time(#[from] TimeError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    Serde(#[from] serde_yaml::Error),
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("A simulated vCPU thread panicked")]
    ThreadPanicked,
}
