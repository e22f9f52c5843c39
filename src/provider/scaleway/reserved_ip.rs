//! Reserved IP assignment
//!
//! Every node should hold one flexible IP out of the configured pool. A node
//! already holding a pool IP is left alone; otherwise the first free pool IP
//! is attached to its server.

use super::responses::{FlexibleIp, UpdateIpRequest};
use super::ScalewayClient;
use crate::node::{NodeAddress, NodeIdentity};
use crate::provider::{ProvisionError, ReservedIpProvisioner};
use async_trait::async_trait;
use tracing::{debug, info};

/// What to do with the pool for one server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment<'a> {
    /// The server already holds this pool IP
    Held(&'a FlexibleIp),
    /// Attach this free pool IP
    Attach(&'a FlexibleIp),
    /// Every pool IP is attached to another server
    Exhausted,
}

/// Choose the pool IP for `server_id`, preferring one it already holds
#[must_use]
pub fn pick_reserved_ip<'a>(server_id: &str, pool: &'a [FlexibleIp]) -> Assignment<'a> {
    if let Some(held) = pool
        .iter()
        .find(|ip| ip.server.as_ref().is_some_and(|s| s.id == server_id))
    {
        return Assignment::Held(held);
    }
    pool.iter()
        .find(|ip| ip.server.is_none())
        .map_or(Assignment::Exhausted, Assignment::Attach)
}

#[async_trait]
impl ReservedIpProvisioner for ScalewayClient {
    async fn assign_reserved_ip(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
    ) -> Result<(), ProvisionError> {
        if self.reserved_ips.is_empty() {
            return Ok(());
        }

        let Some(server) = self.find_server(node.as_str()).await? else {
            if addresses.is_empty() {
                debug!(node = %node, "Node removed, no reserved IP to assign");
                return Ok(());
            }
            return Err(ProvisionError::ServerNotFound(node.to_string()));
        };

        let _assigning = self.assignment.lock().await;

        let mut pool = Vec::with_capacity(self.reserved_ips.len());
        for ip_id in &self.reserved_ips {
            pool.push(self.get_ip(ip_id).await?);
        }

        match pick_reserved_ip(&server.id, &pool) {
            Assignment::Held(ip) => {
                debug!(node = %node, ip = ip.address.as_str(), "Node already holds a reserved IP");
                Ok(())
            }
            Assignment::Attach(ip) => {
                self.update_ip(
                    &ip.id,
                    &UpdateIpRequest {
                        server: Some(&server.id),
                        ..UpdateIpRequest::default()
                    },
                )
                .await?;
                info!(
                    node = %node,
                    ip = ip.address.as_str(),
                    server_id = server.id.as_str(),
                    "Attached reserved IP to node"
                );
                Ok(())
            }
            Assignment::Exhausted => Err(ProvisionError::PoolExhausted(node.to_string())),
        }
    }
}
