//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `node_sync_node_events_total` - Node change events by kind and decision (enqueued/skipped)
//! - `node_sync_queue_adds_total` - Nodes added to the reconciliation queue
//! - `node_sync_queue_depth` - Nodes waiting for a worker
//! - `node_sync_reconciliations_total` - Reconciliation passes started
//! - `node_sync_reconciliation_failures_total` - Passes with at least one failed target
//! - `node_sync_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `node_sync_target_failures_total` - Failed sync calls by target
//! - `node_sync_requeues_total` - Rate-limited retries scheduled
//! - `node_sync_dropped_total` - Nodes dropped after exhausting their retries
//! - `node_sync_watch_errors_total` - Node watch stream errors by kind

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static NODE_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_sync_node_events_total",
            "Node change events by kind and filter decision",
        ),
        &["kind", "decision"],
    )
    .expect("Failed to create NODE_EVENTS_TOTAL metric - this should never happen")
});

static QUEUE_ADDS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_sync_queue_adds_total",
        "Total number of nodes added to the reconciliation queue",
    )
    .expect("Failed to create QUEUE_ADDS_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("node_sync_queue_depth", "Nodes waiting for a worker")
        .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_sync_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_sync_reconciliation_failures_total",
        "Total number of reconciliation passes with at least one failed target",
    )
    .expect("Failed to create RECONCILIATION_FAILURES_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "node_sync_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TARGET_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_sync_target_failures_total",
            "Failed sync calls by target",
        ),
        &["target"],
    )
    .expect("Failed to create TARGET_FAILURES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_sync_requeues_total",
        "Total number of rate-limited retries scheduled",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_sync_dropped_total",
        "Total number of nodes dropped after exhausting their retries",
    )
    .expect("Failed to create DROPPED_TOTAL metric - this should never happen")
});

static WATCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_sync_watch_errors_total",
            "Node watch stream errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_ERRORS_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry served on `/metrics`
///
/// # Errors
/// Returns an error if a metric is registered twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(NODE_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_ADDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TARGET_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_node_events(kind: &str, decision: &str) {
    NODE_EVENTS_TOTAL.with_label_values(&[kind, decision]).inc();
}

pub fn increment_queue_adds() {
    QUEUE_ADDS_TOTAL.inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_failures() {
    RECONCILIATION_FAILURES_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_sync_target_failures(target: &str) {
    TARGET_FAILURES_TOTAL.with_label_values(&[target]).inc();
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

pub fn increment_dropped() {
    DROPPED_TOTAL.inc();
}

pub fn increment_watch_errors(kind: &str) {
    WATCH_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}
