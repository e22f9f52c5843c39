//! Reverse DNS records
//!
//! Every public IP attached to the node's server resolves back to
//! `<node>.<domain>`.

use super::responses::UpdateIpRequest;
use super::ScalewayClient;
use crate::node::{NodeAddress, NodeIdentity};
use crate::provider::{ProvisionError, ReverseDnsProvisioner};
use async_trait::async_trait;
use tracing::{debug, info};

/// Reverse record for `node` under `domain`
#[must_use]
pub fn reverse_name(node: &NodeIdentity, domain: &str) -> String {
    format!("{}.{}", node, domain.trim_matches('.'))
}

impl ScalewayClient {
    /// Point the reverse record of `ip_id` at `wanted`, returning whether it changed
    async fn ensure_reverse(&self, ip_id: &str, wanted: &str) -> Result<bool, ProvisionError> {
        let ip = self.get_ip(ip_id).await?;
        if ip.reverse.as_deref() == Some(wanted) {
            return Ok(false);
        }
        self.update_ip(
            &ip.id,
            &UpdateIpRequest {
                reverse: Some(wanted),
                ..UpdateIpRequest::default()
            },
        )
        .await?;
        Ok(true)
    }
}

#[async_trait]
impl ReverseDnsProvisioner for ScalewayClient {
    async fn set_reverse_record(
        &self,
        node: &NodeIdentity,
        _addresses: &[NodeAddress],
        domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let Some(domain) = domain else {
            return Ok(());
        };
        let Some(server) = self.find_server(node.as_str()).await? else {
            debug!(node = %node, "No server for node, skipping reverse DNS");
            return Ok(());
        };

        let wanted = reverse_name(node, domain);
        let mut failures = Vec::new();
        for server_ip in server.public_ips() {
            match self.ensure_reverse(&server_ip.id, &wanted).await {
                Ok(true) => info!(
                    node = %node,
                    ip = server_ip.address.as_str(),
                    reverse = wanted.as_str(),
                    "Updated reverse DNS record"
                ),
                Ok(false) => debug!(
                    node = %node,
                    ip = server_ip.address.as_str(),
                    "Reverse DNS up to date"
                ),
                Err(e) => failures.push(format!("{}: {e}", server_ip.address)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::Aggregate(failures.join("; ")))
        }
    }
}
