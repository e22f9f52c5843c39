//! # Provider Modules
//!
//! Provisioners that apply node state to external network resources.
//!
//! Each sync target has its own trait so the orchestrator can be driven by
//! any implementation:
//! - `ReservedIpProvisioner` for reserved public IPs
//! - `ReverseDnsProvisioner` for reverse DNS (PTR) records
//! - `AclProvisioner` for managed database ACLs
//!
//! Implementations must be idempotent: calling them again with the same input
//! converges to the same external state without duplicating anything.

use crate::node::{NodeAddress, NodeIdentity};
use async_trait::async_trait;
use thiserror::Error;

pub mod scaleway;

/// Failure of a single provisioning call
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("no instance found for node {0}")]
    ServerNotFound(String),
    #[error("no free reserved IP left in the pool for node {0}")]
    PoolExhausted(String),
    #[error("{0}")]
    Aggregate(String),
}

/// Keeps a reserved public IP attached to every node
#[async_trait]
pub trait ReservedIpProvisioner: Send + Sync {
    async fn assign_reserved_ip(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
    ) -> Result<(), ProvisionError>;
}

/// Keeps the reverse DNS records of node IPs pointing at the node
#[async_trait]
pub trait ReverseDnsProvisioner: Send + Sync {
    /// `domain` is `None` when reverse DNS sync is disabled
    async fn set_reverse_record(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
        domain: Option<&str>,
    ) -> Result<(), ProvisionError>;
}

/// Keeps database ACLs allowing exactly the current node addresses
#[async_trait]
pub trait AclProvisioner: Send + Sync {
    /// An empty `database_ids` disables ACL sync
    async fn update_database_acls(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
        database_ids: &[String],
    ) -> Result<(), ProvisionError>;
}
