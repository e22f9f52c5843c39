//! # Worker Loop
//!
//! Pulls node identities from the queue, runs a reconciliation pass for each
//! and decides whether a failed node is retried or dropped.
//!
//! A node is retried with rate-limited backoff while it has been requeued
//! fewer than `max_retries` times. After that it is forgotten and reported as
//! a terminal failure; only a new change notification brings it back.

use crate::controller::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::controller::queue::ReconciliationQueue;
use crate::node::NodeIdentity;
use crate::observability::EventRecorder;
use std::sync::Arc;
use tracing::debug;

/// Hands the node back to the queue even if reconciliation panics
struct DoneGuard<'a> {
    queue: &'a ReconciliationQueue,
    node: &'a NodeIdentity,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.node);
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: ReconciliationQueue,
    orchestrator: Arc<SyncOrchestrator>,
    recorder: Arc<dyn EventRecorder>,
    max_retries: usize,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Worker {
    #[must_use]
    pub fn new(
        queue: ReconciliationQueue,
        orchestrator: Arc<SyncOrchestrator>,
        recorder: Arc<dyn EventRecorder>,
        max_retries: usize,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            recorder,
            max_retries,
        }
    }

    /// Process nodes until the queue shuts down
    pub async fn run(&self) {
        while self.process_next_item().await {}
        debug!("Worker stopped");
    }

    /// Process one node, returning `false` once the queue is shut down
    pub async fn process_next_item(&self) -> bool {
        let Some(node) = self.queue.get().await else {
            return false;
        };
        let _done = DoneGuard {
            queue: &self.queue,
            node: &node,
        };

        let outcome = self.orchestrator.reconcile(&node).await;
        self.handle_outcome(&node, &outcome);
        true
    }

    fn handle_outcome(&self, node: &NodeIdentity, outcome: &SyncOutcome) {
        if outcome.is_success() {
            self.queue.forget(node);
            self.recorder.reconciled(node);
            return;
        }

        let retries = self.queue.num_requeues(node);
        if retries < self.max_retries {
            let delay = self.queue.add_rate_limited(node.clone());
            self.recorder
                .retry_scheduled(node, retries + 1, delay, outcome);
        } else {
            self.queue.forget(node);
            self.recorder.terminal_failure(node, outcome);
        }
    }
}
