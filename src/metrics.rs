//! Prometheus metrics for the eviction loop
//!
//! Collectors live in the default registry and are served as text by the
//! status server (see [`crate::dashboard`]).

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Cycle Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed polling cycles.
    ///
    /// Labels:
    /// - outcome: "ok" or "aborted" (snapshot could not be read/parsed)
    pub static ref CYCLES_TOTAL: CounterVec = register_counter_vec!(
        "evictd_cycles_total",
        "Polling cycles by outcome",
        &["outcome"]
    ).expect("failed to register CYCLES_TOTAL metric");

    /// Wall time of one full cycle, snapshot to last action.
    pub static ref CYCLE_DURATION: Histogram = register_histogram!(
        "evictd_cycle_duration_seconds",
        "Duration of one polling cycle",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register CYCLE_DURATION metric");

    /// Entities in the last container snapshot.
    pub static ref ENTITIES_OBSERVED: Gauge = register_gauge!(
        "evictd_entities_observed",
        "Workload processes in the last container snapshot"
    ).expect("failed to register ENTITIES_OBSERVED metric");

    /// Entities mapped to a container identity in the last cycle.
    pub static ref ENTITIES_RESOLVED: Gauge = register_gauge!(
        "evictd_entities_resolved",
        "Workload processes resolved to a container in the last cycle"
    ).expect("failed to register ENTITIES_RESOLVED metric");

    /// Live population per floor group at the start of the last cycle.
    ///
    /// Labels:
    /// - group: "low" or "high"
    pub static ref POPULATION: GaugeVec = register_gauge_vec!(
        "evictd_population",
        "Distinct live containers per floor group at cycle start",
        &["group"]
    ).expect("failed to register POPULATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Policy Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Successful terminations.
    ///
    /// Labels:
    /// - class: workload class of the evicted container
    pub static ref EVICTIONS_TOTAL: CounterVec = register_counter_vec!(
        "evictd_evictions_total",
        "Containers terminated by the policy",
        &["class"]
    ).expect("failed to register EVICTIONS_TOTAL metric");

    /// Breaching entities that were not terminated.
    ///
    /// Labels:
    /// - reason: "unresolved", "exempt", "already_terminated", "floor"
    pub static ref SKIPS_TOTAL: CounterVec = register_counter_vec!(
        "evictd_eviction_skips_total",
        "Threshold breaches that were not acted on",
        &["reason"]
    ).expect("failed to register SKIPS_TOTAL metric");

    /// Terminate calls that returned an error.
    pub static ref TERMINATE_FAILURES: Counter = register_counter!(
        "evictd_terminate_failures_total",
        "Terminate calls that failed"
    ).expect("failed to register TERMINATE_FAILURES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Per-Container Gauges
    // ─────────────────────────────────────────────────────────────────────────────

    /// Last computed CPU utilization per resolved container.
    ///
    /// Labels:
    /// - container: short container id (12 chars)
    /// - class: workload class
    pub static ref CONTAINER_CPU_PERCENT: GaugeVec = register_gauge_vec!(
        "evictd_container_cpu_percent",
        "CPU utilization of a container in the last cycle",
        &["container", "class"]
    ).expect("failed to register CONTAINER_CPU_PERCENT metric");

    /// Last reported memory share per resolved container.
    pub static ref CONTAINER_MEM_PERCENT: GaugeVec = register_gauge_vec!(
        "evictd_container_mem_percent",
        "Memory share of a container in the last cycle",
        &["container", "class"]
    ).expect("failed to register CONTAINER_MEM_PERCENT metric");
}

/// Register every collector so the first scrape is complete.
pub fn init() {
    for outcome in ["ok", "aborted"] {
        CYCLES_TOTAL.with_label_values(&[outcome]);
    }
    for group in ["low", "high"] {
        POPULATION.with_label_values(&[group]);
    }
    ENTITIES_OBSERVED.set(0.0);
    ENTITIES_RESOLVED.set(0.0);
}

/// Short form of a container id used as a label value
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Drop per-container series from the previous cycle
pub fn reset_container_gauges() {
    CONTAINER_CPU_PERCENT.reset();
    CONTAINER_MEM_PERCENT.reset();
}

/// Encode the default registry in Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buf).unwrap_or_default()
}
