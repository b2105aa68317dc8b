//! ## vtime-telemetry::metrics
//! **Prometheus exporter for clock state and counters**
//!
//! Gauges are refreshed from a [`VirtualTime`] on demand with
//! [`MetricsRecorder::record`]; nothing is updated on the clock hot path.

use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use vtime_core::VirtualTime;

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    counters: Vec<(&'static str, IntGauge)>,
    lag: IntGauge,
    catch_up_percent: IntGauge,
    ticking_vcpus: IntGauge,
}

fn gauge(registry: &Registry, name: String, help: String) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MetricsRecorder {
    /// Registers every gauge under `prefix`, e.g. `vtime_lag_ns`.
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counters = vtime_core::stats::StatsSnapshot::default()
            .entries()
            .into_iter()
            .map(|(name, _)| {
                let gauge = gauge(
                    &registry,
                    format!("{prefix}_{name}_total"),
                    format!("Virtual clock events: {}", name.replace('_', " ")),
                )?;
                Ok((name, gauge))
            })
            .collect::<Result<Vec<_>, prometheus::Error>>()?;

        let lag = gauge(
            &registry,
            format!("{prefix}_lag_ns"),
            "Synchronized clock lag behind the virtual clock".into(),
        )?;
        let catch_up_percent = gauge(
            &registry,
            format!("{prefix}_catch_up_percent"),
            "Current catch-up rate, 0 when not catching up".into(),
        )?;
        let ticking_vcpus = gauge(
            &registry,
            format!("{prefix}_ticking_vcpus"),
            "Virtual CPUs holding the virtual clock running".into(),
        )?;

        Ok(Self {
            registry,
            counters,
            lag,
            catch_up_percent,
            ticking_vcpus,
        })
    }

    /// Copies the current clock state into the gauges.
    pub fn record(&self, time: &VirtualTime) {
        let entries = time.stats().entries();
        for ((_, gauge), (_, value)) in self.counters.iter().zip(entries) {
            gauge.set(clamp(value));
        }
        self.lag.set(clamp(time.lag()));
        self.catch_up_percent.set(i64::from(time.catch_up_percent()));
        self.ticking_vcpus.set(i64::from(time.ticking_count()));
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
