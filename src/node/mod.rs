//! # Nodes
//!
//! Observed state of cluster nodes and the collaborators that produce it.
//!
//! - `watcher`: Kubernetes watch source emitting [`ChangeEvent`]s
//! - `lookup`: reads the current addresses of a node

mod lookup;
mod watcher;

pub use lookup::*;
pub use watcher::*;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Key uniquely identifying a node
///
/// Nodes are cluster-scoped, so the namespace/name key reduces to the node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity(Arc<str>);

impl NodeIdentity {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One entry of a node's `status.addresses`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    /// Address type, e.g. `InternalIP`, `ExternalIP`, `Hostname`
    pub kind: String,
    pub address: String,
}

impl NodeAddress {
    #[must_use]
    pub fn new(kind: &str, address: &str) -> Self {
        Self {
            kind: kind.to_string(),
            address: address.to_string(),
        }
    }
}

pub const INTERNAL_IP: &str = "InternalIP";
pub const EXTERNAL_IP: &str = "ExternalIP";

/// Observed state of a node at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub identity: NodeIdentity,
    /// Opaque marker that advances on every mutation of the node
    pub revision: String,
    /// Unordered address list
    pub addresses: Vec<NodeAddress>,
}

impl NodeSnapshot {
    #[must_use]
    pub fn new(name: &str, revision: &str, addresses: Vec<NodeAddress>) -> Self {
        Self {
            identity: NodeIdentity::new(name),
            revision: revision.to_string(),
            addresses,
        }
    }

    /// Build a snapshot from a Kubernetes node, `None` when it has no name
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.as_deref()?;
        let addresses = node
            .status
            .as_ref()
            .and_then(|status| status.addresses.as_ref())
            .map(|addresses| {
                addresses
                    .iter()
                    .map(|a| NodeAddress::new(&a.type_, &a.address))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self::new(
            name,
            node.metadata.resource_version.as_deref().unwrap_or_default(),
            addresses,
        ))
    }
}

/// Addresses of the given type
pub fn addresses_of<'a>(
    addresses: &'a [NodeAddress],
    kind: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    addresses
        .iter()
        .filter(move |a| a.kind == kind)
        .map(|a| a.address.as_str())
}

/// A node transition observed by the watch source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(NodeSnapshot),
    Updated {
        old: NodeSnapshot,
        new: NodeSnapshot,
    },
    Removed(NodeIdentity),
}

/// Source of node change events
///
/// Implementations push events into `events` until `shutdown` flips to `true`,
/// and set `synced` once the initial listing has been fully delivered.
#[async_trait]
pub trait WatchSource: Send + 'static {
    async fn run(
        self: Box<Self>,
        events: mpsc::Sender<ChangeEvent>,
        synced: watch::Sender<bool>,
        shutdown: watch::Receiver<bool>,
    );
}

/// Reads the current addresses of a node
#[async_trait]
pub trait NodeLookup: Send + Sync {
    /// `Ok(None)` when the node no longer exists
    async fn addresses(&self, identity: &NodeIdentity) -> anyhow::Result<Option<Vec<NodeAddress>>>;
}
