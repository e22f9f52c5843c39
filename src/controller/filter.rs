//! # Change Filter
//!
//! Decides which node notifications are worth a reconciliation and enqueues
//! the node identity for those.
//!
//! Creations and removals always are. An update is when the revision did not
//! move (the watch replayed the node, which is how a full resync shows up) or
//! when an address type present on both sides changed value. Updates that
//! only touch conditions, labels or heartbeats are dropped so the queue is
//! not flooded by routine node status churn.

use crate::controller::queue::ReconciliationQueue;
use crate::node::{ChangeEvent, NodeAddress, NodeIdentity, NodeSnapshot};
use crate::observability::metrics;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Whether an update from `old` to `new` needs a reconciliation
#[must_use]
pub fn needs_resync(old: &NodeSnapshot, new: &NodeSnapshot) -> bool {
    if old.revision == new.revision {
        return true;
    }

    let old_by_kind = addresses_by_kind(&old.addresses);
    let new_by_kind = addresses_by_kind(&new.addresses);
    old_by_kind.iter().any(|(kind, old_values)| {
        new_by_kind
            .get(kind)
            .is_some_and(|new_values| new_values != old_values)
    })
}

fn addresses_by_kind(addresses: &[NodeAddress]) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut by_kind: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for address in addresses {
        by_kind
            .entry(address.kind.as_str())
            .or_default()
            .insert(address.address.as_str());
    }
    by_kind
}

/// Feeds reconciliation-worthy node changes into the queue
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    queue: ReconciliationQueue,
}

impl ChangeFilter {
    #[must_use]
    pub fn new(queue: ReconciliationQueue) -> Self {
        Self { queue }
    }

    pub fn on_added(&self, snapshot: &NodeSnapshot) -> bool {
        self.enqueue("added", &snapshot.identity);
        true
    }

    pub fn on_updated(&self, old: &NodeSnapshot, new: &NodeSnapshot) -> bool {
        if needs_resync(old, new) {
            self.enqueue("updated", &new.identity);
            true
        } else {
            debug!(
                node = %new.identity,
                old_revision = old.revision.as_str(),
                new_revision = new.revision.as_str(),
                "Ignoring node update without address change"
            );
            metrics::increment_node_events("updated", "skipped");
            false
        }
    }

    pub fn on_removed(&self, identity: &NodeIdentity) -> bool {
        self.enqueue("removed", identity);
        true
    }

    /// Route one change event, returning whether the node was enqueued
    pub fn handle(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Added(snapshot) => self.on_added(snapshot),
            ChangeEvent::Updated { old, new } => self.on_updated(old, new),
            ChangeEvent::Removed(identity) => self.on_removed(identity),
        }
    }

    /// Consume change events until the watch source closes the channel
    pub async fn run(self, mut events: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        info!("Change event stream closed");
    }

    fn enqueue(&self, kind: &'static str, identity: &NodeIdentity) {
        debug!(node = %identity, event = kind, "Enqueueing node");
        metrics::increment_node_events(kind, "enqueued");
        self.queue.add(identity.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backoff::RateLimiterConfig;
    use crate::node::{NodeAddress, EXTERNAL_IP, INTERNAL_IP};

    fn snapshot(revision: &str, addresses: &[(&str, &str)]) -> NodeSnapshot {
        NodeSnapshot::new(
            "n1",
            revision,
            addresses
                .iter()
                .map(|(kind, address)| NodeAddress::new(kind, address))
                .collect(),
        )
    }

    #[test]
    fn test_unchanged_revision_always_resyncs() {
        let old = snapshot("7", &[(INTERNAL_IP, "10.0.0.1")]);
        assert!(needs_resync(&old, &old.clone()));

        let new = snapshot("7", &[(INTERNAL_IP, "10.0.0.9")]);
        assert!(needs_resync(&old, &new));
    }

    #[test]
    fn test_changed_revision_with_same_addresses_is_ignored() {
        let old = snapshot("7", &[(INTERNAL_IP, "10.0.0.1"), (EXTERNAL_IP, "51.0.0.1")]);
        let new = snapshot("8", &[(EXTERNAL_IP, "51.0.0.1"), (INTERNAL_IP, "10.0.0.1")]);
        assert!(!needs_resync(&old, &new));
    }

    #[test]
    fn test_changed_address_of_shared_type_resyncs() {
        let old = snapshot("7", &[(INTERNAL_IP, "10.0.0.1")]);
        let new = snapshot("8", &[(INTERNAL_IP, "10.0.0.2")]);
        assert!(needs_resync(&old, &new));
    }

    #[test]
    fn test_address_type_on_one_side_only_is_ignored() {
        let old = snapshot("7", &[(INTERNAL_IP, "10.0.0.1")]);
        let new = snapshot("8", &[(INTERNAL_IP, "10.0.0.1"), (EXTERNAL_IP, "51.0.0.1")]);
        assert!(!needs_resync(&old, &new));
        assert!(!needs_resync(&new, &old));
    }

    #[test]
    fn test_multi_valued_type_compared_as_set() {
        let old = snapshot("7", &[(INTERNAL_IP, "10.0.0.1"), (INTERNAL_IP, "fd00::1")]);
        let reordered = snapshot("8", &[(INTERNAL_IP, "fd00::1"), (INTERNAL_IP, "10.0.0.1")]);
        assert!(!needs_resync(&old, &reordered));

        let changed = snapshot("9", &[(INTERNAL_IP, "10.0.0.1"), (INTERNAL_IP, "fd00::2")]);
        assert!(needs_resync(&old, &changed));
    }

    #[tokio::test]
    async fn test_filter_enqueues_worthy_events_only() {
        let queue = ReconciliationQueue::new(RateLimiterConfig::default());
        let filter = ChangeFilter::new(queue.clone());

        let old = snapshot("1", &[(INTERNAL_IP, "10.0.0.1")]);
        let heartbeat = snapshot("2", &[(INTERNAL_IP, "10.0.0.1")]);
        assert!(!filter.handle(&ChangeEvent::Updated {
            old: old.clone(),
            new: heartbeat
        }));
        assert!(queue.is_empty());

        assert!(filter.handle(&ChangeEvent::Added(old)));
        assert!(filter.handle(&ChangeEvent::Removed(NodeIdentity::new("n2"))));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_run_drains_channel_into_queue() {
        let queue = ReconciliationQueue::new(RateLimiterConfig::default());
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(ChangeFilter::new(queue.clone()).run(rx));

        tx.send(ChangeEvent::Removed(NodeIdentity::new("gone")))
            .await
            .expect("filter is running");
        drop(tx);
        task.await.expect("filter task must not panic");

        assert_eq!(queue.get().await, Some(NodeIdentity::new("gone")));
    }
}
