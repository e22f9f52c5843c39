//! # Reconciliation Queue
//!
//! Deduplicating, rate-limited work queue keyed by [`NodeIdentity`].
//!
//! Every node known to the queue is in exactly one state:
//!
//! - `Queued`: waiting in the FIFO for a worker
//! - `Processing`: handed out by [`ReconciliationQueue::get`], not yet `done`
//! - `ProcessingDirty`: handed out, and added again while in flight
//!
//! A node is never handed to two workers at once. Adding a node that is being
//! processed only marks it dirty; [`ReconciliationQueue::done`] puts it back
//! in the FIFO so the latest state gets reconciled once more.

use crate::controller::backoff::{RateLimiter, RateLimiterConfig};
use crate::node::NodeIdentity;
use crate::observability::metrics;
use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Queued,
    Processing,
    ProcessingDirty,
}

#[derive(Debug)]
struct QueueState {
    entries: HashMap<NodeIdentity, EntryState>,
    order: VecDeque<NodeIdentity>,
    limiter: RateLimiter,
    shutting_down: bool,
}

impl QueueState {
    fn enqueue(&mut self, node: NodeIdentity) {
        self.entries.insert(node.clone(), EntryState::Queued);
        self.order.push_back(node);
        metrics::set_queue_depth(self.order.len());
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    available: Notify,
    closed: watch::Sender<bool>,
}

/// Work queue shared by the change filter (producer) and the workers
///
/// Cloning is cheap and yields a handle to the same queue.
#[derive(Debug, Clone)]
pub struct ReconciliationQueue {
    shared: Arc<Shared>,
}

impl ReconciliationQueue {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    entries: HashMap::new(),
                    order: VecDeque::new(),
                    limiter: RateLimiter::new(config),
                    shutting_down: false,
                }),
                available: Notify::new(),
                closed: watch::Sender::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `node` unless it is already pending
    ///
    /// Ignored once the queue is shut down.
    pub fn add(&self, node: NodeIdentity) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }

        match state.entries.get(&node).copied() {
            Some(EntryState::Queued | EntryState::ProcessingDirty) => {
                trace!(node = %node, "Node already pending");
            }
            Some(EntryState::Processing) => {
                trace!(node = %node, "Node in flight, marking dirty");
                state.entries.insert(node, EntryState::ProcessingDirty);
            }
            None => {
                state.enqueue(node);
                drop(state);
                metrics::increment_queue_adds();
                self.shared.available.notify_one();
            }
        }
    }

    /// Wait for the next node to reconcile
    ///
    /// Returns `None` as soon as the queue is shut down, even if nodes are
    /// still pending. The returned node must be handed back with
    /// [`ReconciliationQueue::done`].
    pub async fn get(&self) -> Option<NodeIdentity> {
        loop {
            // Register interest before inspecting the state so a concurrent
            // add or shutdown cannot slip between the check and the wait.
            let mut notified = pin!(self.shared.available.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(node) = state.order.pop_front() {
                    state.entries.insert(node.clone(), EntryState::Processing);
                    metrics::set_queue_depth(state.order.len());
                    return Some(node);
                }
            }

            notified.await;
        }
    }

    /// Mark processing of `node` as finished
    ///
    /// Requeues it when it was added again while in flight.
    pub fn done(&self, node: &NodeIdentity) {
        let mut state = self.lock();
        match state.entries.get(node).copied() {
            Some(EntryState::Processing) => {
                state.entries.remove(node);
            }
            Some(EntryState::ProcessingDirty) => {
                if state.shutting_down {
                    state.entries.remove(node);
                    return;
                }
                state.enqueue(node.clone());
                drop(state);
                self.shared.available.notify_one();
            }
            Some(EntryState::Queued) | None => {}
        }
    }

    /// Reset the retry counter of `node`
    pub fn forget(&self, node: &NodeIdentity) {
        self.lock().limiter.forget(node);
    }

    /// Number of rate-limited requeues of `node` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, node: &NodeIdentity) -> usize {
        self.lock().limiter.num_requeues(node)
    }

    /// Requeue `node` after its rate-limited backoff and count the retry
    ///
    /// Returns the delay that was applied. Once the queue is shut down the
    /// node is neither requeued nor counted, and the delay is zero.
    pub fn add_rate_limited(&self, node: NodeIdentity) -> Duration {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return Duration::ZERO;
            }
            state.limiter.when(&node)
        };
        self.add_after(node, delay);
        delay
    }

    /// Queue `node` once `delay` has elapsed
    ///
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(&self, node: NodeIdentity, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(node);
            return;
        }

        let queue = self.clone();
        let mut closed = self.shared.closed.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => queue.add(node),
                _ = closed.wait_for(|closed| *closed) => {}
            }
        });
    }

    /// Shut the queue down
    ///
    /// Wakes every blocked [`ReconciliationQueue::get`]; all current and
    /// future calls return `None`. Idempotent.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.shared.closed.send_replace(true);
        self.shared.available.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Whether `node` is queued or being processed
    #[must_use]
    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.lock().entries.contains_key(node)
    }

    /// Number of nodes waiting for a worker
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> ReconciliationQueue {
        ReconciliationQueue::new(RateLimiterConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            qps: 0.0,
            burst: 0,
        })
    }

    fn node(name: &str) -> NodeIdentity {
        NodeIdentity::new(name)
    }

    #[tokio::test]
    async fn test_add_deduplicates_pending_nodes() {
        let queue = queue();
        queue.add(node("n1"));
        queue.add(node("n1"));
        queue.add(node("n2"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(node("n1")));
        assert_eq!(queue.get().await, Some(node("n2")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_after_done() {
        let queue = queue();
        queue.add(node("n1"));
        let n1 = queue.get().await.expect("queued node");

        // Several adds while in flight collapse into one redelivery
        queue.add(node("n1"));
        queue.add(node("n1"));
        assert!(queue.is_empty(), "in-flight node must not be queued twice");

        queue.done(&n1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(node("n1")));
        queue.done(&n1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_dirty_drops_node() {
        let queue = queue();
        queue.add(node("n1"));
        let n1 = queue.get().await.expect("queued node");
        queue.done(&n1);
        assert!(queue.is_empty());

        // A later add is delivered again
        queue.add(node("n1"));
        assert_eq!(queue.get().await, Some(node("n1")));
    }

    #[tokio::test]
    async fn test_shut_down_unblocks_waiting_get() {
        let queue = queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down();
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("get must return after shutdown")
            .expect("task must not panic");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_shut_down_is_idempotent_and_rejects_adds() {
        let queue = queue();
        queue.add(node("n1"));
        queue.shut_down();
        queue.shut_down();
        assert!(queue.is_shutting_down());

        queue.add(node("n2"));
        assert_eq!(queue.get().await, None);
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_add_rate_limited_counts_requeues_and_delivers_later() {
        let queue = queue();
        let delay = queue.add_rate_limited(node("n1"));
        assert_eq!(delay, Duration::from_millis(5));
        assert_eq!(queue.num_requeues(&node("n1")), 1);

        let delivered = tokio::time::timeout(Duration::from_secs(5), queue.get())
            .await
            .expect("rate limited node must be delivered");
        assert_eq!(delivered, Some(node("n1")));
    }

    #[tokio::test]
    async fn test_forget_resets_requeues_independent_of_membership() {
        let queue = queue();
        queue.add_rate_limited(node("n1"));
        queue.add_rate_limited(node("n1"));
        assert_eq!(queue.num_requeues(&node("n1")), 2);

        queue.forget(&node("n1"));
        assert_eq!(queue.num_requeues(&node("n1")), 0);
    }

    #[tokio::test]
    async fn test_add_rate_limited_after_shutdown_is_not_counted() {
        let queue = queue();
        queue.shut_down();

        assert_eq!(queue.add_rate_limited(node("n1")), Duration::ZERO);
        assert_eq!(queue.num_requeues(&node("n1")), 0);
        assert!(!queue.contains(&node("n1")));
    }

    #[tokio::test]
    async fn test_contains_tracks_node_until_done() {
        let queue = queue();
        queue.add(node("n1"));
        assert!(queue.contains(&node("n1")));

        let n1 = queue.get().await.expect("queued node");
        assert!(queue.contains(&n1), "in-flight node is still tracked");
        queue.done(&n1);
        assert!(!queue.contains(&n1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_add_dropped_on_shutdown() {
        let queue = queue();
        queue.add_after(node("n1"), Duration::from_secs(60));
        queue.shut_down();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(queue.is_empty());
    }
}
