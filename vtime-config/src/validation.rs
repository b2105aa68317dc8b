//! Custom validation functions for configuration.
//!
//! Cross-field and table checks that `validator`'s built-in rules cannot express.

use validator::ValidationError;

use crate::{CatchUpPeriod, ClockConfig, SimulatorConfig};

/// The timer CPU must exist and the early-exit window must fit in the retry budget.
pub fn validate_clock_topology(config: &ClockConfig) -> Result<(), ValidationError> {
    if config.timer_cpu >= config.vcpu_count {
        return Err(ValidationError::new("timer_cpu_out_of_range"));
    }
    if config.cas_early_exit_below > config.cas_retry_limit {
        return Err(ValidationError::new("early_exit_exceeds_retry_limit"));
    }
    Ok(())
}

/// Catch-up rows must be strictly increasing in `start_ns` with sane percentages.
pub fn validate_catch_up_periods(periods: &[CatchUpPeriod]) -> Result<(), ValidationError> {
    if periods.is_empty() {
        return Err(ValidationError::new("empty_catch_up_table"));
    }
    if periods
        .iter()
        .any(|period| period.percentage == 0 || period.percentage > 10_000)
    {
        return Err(ValidationError::new("invalid_catch_up_percentage"));
    }
    if periods
        .windows(2)
        .any(|pair| pair[0].start_ns >= pair[1].start_ns)
    {
        return Err(ValidationError::new("catch_up_table_not_increasing"));
    }
    Ok(())
}

/// Metric prefixes end up in prometheus names: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn validate_metric_prefix(prefix: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(prefix) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_metric_prefix"))
    }
}

/// Snapshot cells carry the interval counter in 32 bits.
pub fn validate_interval_counter(config: &SimulatorConfig) -> Result<(), ValidationError> {
    let ticks = config.interval_counter();
    if ticks == 0 || ticks > u64::from(u32::MAX) {
        return Err(ValidationError::new("interval_counter_out_of_range"));
    }
    Ok(())
}
