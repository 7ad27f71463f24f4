//! Metrics collection for observability
//!
//! Every collector is registered in a registry owned by the [`Metrics`]
//! value rather than the process-wide default, so several ledgers can live in
//! one process (tests do this constantly).
//!
//! # Metrics
//!
//! - `ledger_mutations_total` - Mutations committed, by operation
//! - `ledger_mutation_failures_total` - Mutations rejected or failed, by operation and kind
//! - `ledger_mutation_duration_seconds` - Histogram of mutation latencies
//! - `ledger_events_loaded` - Events held in memory

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed mutations
    pub mutations_total: IntCounterVec,

    /// Failed mutations
    pub mutation_failures: IntCounterVec,

    /// Mutation duration histogram
    pub mutation_duration: Histogram,

    /// Events in memory
    pub events_loaded: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let mutations_total = IntCounterVec::new(
            Opts::new("ledger_mutations_total", "Mutations committed"),
            &["operation"],
        )?;
        registry.register(Box::new(mutations_total.clone()))?;

        let mutation_failures = IntCounterVec::new(
            Opts::new("ledger_mutation_failures_total", "Mutations rejected or failed"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(mutation_failures.clone()))?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_mutation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(mutation_duration.clone()))?;

        let events_loaded = IntGauge::new("ledger_events_loaded", "Events held in memory")?;
        registry.register(Box::new(events_loaded.clone()))?;

        Ok(Self {
            mutations_total,
            mutation_failures,
            mutation_duration,
            events_loaded,
            registry,
        })
    }

    /// Record a committed mutation
    pub fn record_mutation(&self, operation: &str, duration_seconds: f64) {
        self.mutations_total.with_label_values(&[operation]).inc();
        self.mutation_duration.observe(duration_seconds);
    }

    /// Record a failed mutation; `kind` is `rejected` or `persistence`
    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.mutation_failures
            .with_label_values(&[operation, kind])
            .inc();
    }

    /// Committed count for one operation
    pub fn mutations(&self, operation: &str) -> u64 {
        self.mutations_total.with_label_values(&[operation]).get()
    }

    /// Failure count for one operation and kind
    pub fn failures(&self, operation: &str, kind: &str) -> u64 {
        self.mutation_failures
            .with_label_values(&[operation, kind])
            .get()
    }

    /// Update the in-memory event count
    pub fn set_events_loaded(&self, count: usize) {
        self.events_loaded.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| crate::Error::Other(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Other(e.to_string()))
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("events_loaded", &self.events_loaded.get())
            .finish_non_exhaustive()
    }
}
