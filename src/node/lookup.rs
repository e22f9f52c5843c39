//! # Node Lookup
//!
//! Reads the live addresses of a node from the Kubernetes API so every
//! reconciliation pass works on current state rather than on the event that
//! triggered it.

use super::{NodeAddress, NodeIdentity, NodeLookup, NodeSnapshot};
use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};

/// [`NodeLookup`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNodeLookup {
    nodes: Api<Node>,
}

impl std::fmt::Debug for KubeNodeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeLookup").finish_non_exhaustive()
    }
}

impl KubeNodeLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeLookup for KubeNodeLookup {
    async fn addresses(&self, identity: &NodeIdentity) -> anyhow::Result<Option<Vec<NodeAddress>>> {
        let node = self
            .nodes
            .get_opt(identity.as_str())
            .await
            .with_context(|| format!("Failed to read node {identity}"))?;
        Ok(node
            .as_ref()
            .and_then(NodeSnapshot::from_node)
            .map(|snapshot| snapshot.addresses))
    }
}
