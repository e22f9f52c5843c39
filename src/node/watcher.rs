//! # Node Watcher
//!
//! Watches `Node` objects and turns the raw watch stream into
//! [`ChangeEvent`]s for the change filter.
//!
//! The last seen snapshot of every node is kept privately by the watch task,
//! which is what allows an update to be reported together with the state it
//! replaces.

use super::{ChangeEvent, NodeIdentity, NodeSnapshot, WatchSource};
use crate::runtime::error_policy::handle_watch_stream_error;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// [`WatchSource`] backed by a Kubernetes watch on all nodes
pub struct KubeNodeWatcher {
    nodes: Api<Node>,
}

impl std::fmt::Debug for KubeNodeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeWatcher").finish_non_exhaustive()
    }
}

impl KubeNodeWatcher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl WatchSource for KubeNodeWatcher {
    async fn run(
        self: Box<Self>,
        events: mpsc::Sender<ChangeEvent>,
        synced: watch::Sender<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting node watch...");
        let stream = watcher(self.nodes, watcher::Config::default()).default_backoff();
        pin_mut!(stream);

        let mut translator = EventTranslator::default();

        loop {
            let event = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                event = stream.next() => event,
            };

            match event {
                Some(Ok(event)) => {
                    let initial_sync_done = matches!(event, watcher::Event::InitDone);
                    for change in translator.translate(event) {
                        if events.send(change).await.is_err() {
                            debug!("Change event receiver dropped, stopping node watch");
                            return;
                        }
                    }
                    if initial_sync_done && !*synced.borrow() {
                        info!(nodes = translator.len(), "Initial node listing delivered");
                        synced.send_replace(true);
                    }
                }
                Some(Err(e)) => handle_watch_stream_error(&e.to_string()),
                None => {
                    warn!("Node watch stream ended");
                    break;
                }
            }
        }

        info!("Node watch stopped");
    }
}

/// Converts raw watcher events into change events
///
/// A relist (`Init` .. `InitDone`) replays every node through `InitApply`;
/// nodes that were known before but are absent from the relist are reported
/// as removed once it completes.
#[derive(Debug, Default)]
pub(crate) struct EventTranslator {
    known: HashMap<NodeIdentity, NodeSnapshot>,
    relisted: Option<HashSet<NodeIdentity>>,
}

impl EventTranslator {
    pub(crate) fn len(&self) -> usize {
        self.known.len()
    }

    pub(crate) fn translate(&mut self, event: watcher::Event<Node>) -> Vec<ChangeEvent> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(node) => {
                let Some(snapshot) = NodeSnapshot::from_node(&node) else {
                    return Vec::new();
                };
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(snapshot.identity.clone());
                }
                vec![self.apply(snapshot)]
            }
            watcher::Event::Apply(node) => NodeSnapshot::from_node(&node)
                .map(|snapshot| self.apply(snapshot))
                .into_iter()
                .collect(),
            watcher::Event::Delete(node) => node
                .metadata
                .name
                .as_deref()
                .map(NodeIdentity::new)
                .map(|identity| {
                    self.known.remove(&identity);
                    ChangeEvent::Removed(identity)
                })
                .into_iter()
                .collect(),
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let mut gone: Vec<NodeIdentity> = self
                    .known
                    .keys()
                    .filter(|identity| !seen.contains(*identity))
                    .cloned()
                    .collect();
                gone.sort();
                gone.into_iter()
                    .map(|identity| {
                        self.known.remove(&identity);
                        ChangeEvent::Removed(identity)
                    })
                    .collect()
            }
        }
    }

    fn apply(&mut self, snapshot: NodeSnapshot) -> ChangeEvent {
        match self.known.insert(snapshot.identity.clone(), snapshot.clone()) {
            Some(old) => ChangeEvent::Updated { old, new: snapshot },
            None => ChangeEvent::Added(snapshot),
        }
    }
}
