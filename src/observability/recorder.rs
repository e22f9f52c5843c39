//! # Event Recorder
//!
//! Where workers report what happened to a node. The default recorder writes
//! structured log lines and updates the retry metrics.

use crate::controller::orchestrator::SyncOutcome;
use crate::node::NodeIdentity;
use crate::observability::metrics;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait EventRecorder: Send + Sync {
    /// All targets of `node` are in sync
    fn reconciled(&self, _node: &NodeIdentity) {}

    /// A failed pass will be retried after `delay`
    ///
    /// `attempt` counts retries scheduled so far, this one included.
    fn retry_scheduled(
        &self,
        node: &NodeIdentity,
        attempt: usize,
        delay: Duration,
        outcome: &SyncOutcome,
    );

    /// `node` exhausted its retries and was dropped
    fn terminal_failure(&self, node: &NodeIdentity, outcome: &SyncOutcome);
}

/// [`EventRecorder`] that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn reconciled(&self, node: &NodeIdentity) {
        info!(node = %node, "Node reconciled");
    }

    fn retry_scheduled(
        &self,
        node: &NodeIdentity,
        attempt: usize,
        delay: Duration,
        outcome: &SyncOutcome,
    ) {
        metrics::increment_requeues();
        let next_attempt = chrono::TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| chrono::Utc::now().checked_add_signed(delta))
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();
        warn!(
            node = %node,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            next_attempt = next_attempt.as_str(),
            failures = %outcome,
            "Error syncing node, retrying"
        );
    }

    fn terminal_failure(&self, node: &NodeIdentity, outcome: &SyncOutcome) {
        metrics::increment_dropped();
        error!(
            node = %node,
            failures = %outcome,
            "Dropping node out of the queue after exhausting retries"
        );
    }
}
