use std::time::Duration;

use metrics::{Counter, Gauge, Histogram, Registry, exponential_buckets};

/// Receives what happens inside a [`Gate`](crate::Gate).
///
/// Implementations are called concurrently from every caller of the gate, and
/// some of them are called while the gate's internal lock is held, so they
/// must be cheap and must not call back into the gate.
pub trait Metrics: Send + Sync {
    /// Called once when the gate is created.
    fn observe_capacity(&self, _capacity: usize) {}

    /// Called for every admission, with zero for callers that never waited.
    fn observe_wait(&self, _wait: Duration) {}

    /// Called whenever the number of turn holders may have changed.
    fn observe_occupancy(&self, _occupancy: usize) {}

    /// Called when a waiting caller gives up.
    fn observe_cancelled(&self) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// Reports gate activity into a [`Registry`], every series carries the
/// attribute `gate=<name>`.
#[derive(Clone, Debug)]
pub struct RegistryMetrics {
    capacity: Gauge,
    in_flight: Gauge,
    admitted: Counter,
    cancelled: Counter,
    wait: Histogram,
}

impl RegistryMetrics {
    pub fn new(registry: &Registry, name: &'static str) -> Self {
        let attrs = &[("gate", name)];

        Self {
            capacity: registry
                .register_gauge("gate_capacity", "Maximum number of concurrent turns.")
                .recorder(attrs),
            in_flight: registry
                .register_gauge("gate_in_flight", "Number of turns currently held.")
                .recorder(attrs),
            admitted: registry
                .register_counter("gate_admitted_total", "Total number of admitted callers.")
                .recorder(attrs),
            cancelled: registry
                .register_counter(
                    "gate_cancelled_total",
                    "Total number of callers that gave up while waiting.",
                )
                .recorder(attrs),
            wait: registry
                .register_histogram(
                    "gate_wait_duration_seconds",
                    "How long callers waited before being admitted.",
                    exponential_buckets(0.001, 2.0, 16),
                )
                .recorder(attrs),
        }
    }
}

impl Metrics for RegistryMetrics {
    fn observe_capacity(&self, capacity: usize) {
        self.capacity.set(capacity as u64);
    }

    fn observe_wait(&self, wait: Duration) {
        self.admitted.inc(1);
        self.wait.record(wait.as_secs_f64());
    }

    fn observe_occupancy(&self, occupancy: usize) {
        self.in_flight.set(occupancy as u64);
    }

    fn observe_cancelled(&self) {
        self.cancelled.inc(1);
    }
}
