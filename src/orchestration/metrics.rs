use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use super::unit::UnitState;
use crate::core::{AppResult, ErrorContext};

const DEFAULT_BUCKETS: &[f64] = &[
    0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0,
];

/// Dispatch metrics, kept on a registry owned by one dispatcher so that
/// several servers in a process do not collide.
pub struct DispatchMetrics {
    registry: Registry,
    dispatched: IntCounterVec,
    capacity_exceeded: IntCounter,
    active_units: IntGauge,
    duration: Histogram,
}

impl DispatchMetrics {
    pub fn new() -> AppResult<Self> {
        let registry = Registry::new();

        let dispatched = IntCounterVec::new(
            Opts::new(
                "appsix_dispatch_total",
                "Requests run by execution units, by terminal state",
            ),
            &["state"],
        )?;
        let capacity_exceeded = IntCounter::new(
            "appsix_capacity_exceeded_total",
            "Requests rejected because no execution slot became free in time",
        )?;
        let active_units = IntGauge::new(
            "appsix_active_units",
            "Execution units currently running a request",
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "appsix_dispatch_duration_seconds",
                "Time from slot acquisition to unit completion",
            )
            .buckets(DEFAULT_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(dispatched.clone()))?;
        registry.register(Box::new(capacity_exceeded.clone()))?;
        registry.register(Box::new(active_units.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            dispatched,
            capacity_exceeded,
            active_units,
            duration,
        })
    }

    pub fn unit_started(&self) {
        self.active_units.inc();
    }

    pub fn unit_finished(&self, state: UnitState, elapsed: Duration) {
        self.active_units.dec();
        self.dispatched.with_label_values(&[state.as_str()]).inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub fn capacity_exceeded(&self) {
        self.capacity_exceeded.inc();
    }

    pub fn dispatched_total(&self, state: UnitState) -> u64 {
        self.dispatched.with_label_values(&[state.as_str()]).get()
    }

    pub fn capacity_exceeded_total(&self) -> u64 {
        self.capacity_exceeded.get()
    }

    pub fn active_units(&self) -> i64 {
        self.active_units.get()
    }

    /// Text exposition of every dispatch metric
    pub fn gather(&self) -> AppResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).with_context("Metrics are not valid UTF-8")
    }
}
