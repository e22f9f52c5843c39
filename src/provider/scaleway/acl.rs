//! Managed database ACLs
//!
//! Each node owns the ACL rules described `node:<name>`. The wanted rules are
//! one host rule per `ExternalIP` of the node; owned rules that no longer
//! match are deleted and missing ones added. Rules owned by someone else are
//! never touched.

use super::responses::{
    AclRule, AclRuleRequest, AddAclRulesRequest, DeleteAclRulesRequest, ListAclRulesResponse,
};
use super::ScalewayClient;
use crate::constants::ACL_RULE_DESCRIPTION_PREFIX;
use crate::node::{addresses_of, NodeAddress, NodeIdentity, EXTERNAL_IP};
use crate::provider::{AclProvisioner, ProvisionError};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Host CIDR of an address, `None` when it is not an IP
#[must_use]
pub fn host_cidr(address: &str) -> Option<String> {
    let (ip, prefix) = match address.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (address, None),
    };
    let ip: IpAddr = ip.trim().parse().ok()?;
    let prefix = match (prefix, ip) {
        (Some(prefix), _) => prefix.trim().parse::<u8>().ok()?,
        (None, IpAddr::V4(_)) => 32,
        (None, IpAddr::V6(_)) => 128,
    };
    Some(format!("{ip}/{prefix}"))
}

/// Rules to delete and to add for one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclChanges {
    pub to_delete: Vec<String>,
    pub to_add: Vec<String>,
}

impl AclChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// Diff the rules owned by `description` against the `wanted` host CIDRs
#[must_use]
pub fn acl_changes(description: &str, wanted: &BTreeSet<String>, current: &[AclRule]) -> AclChanges {
    let present: BTreeSet<String> = current
        .iter()
        .filter_map(|rule| host_cidr(&rule.ip))
        .collect();

    let to_delete = current
        .iter()
        .filter(|rule| rule.description.as_deref() == Some(description))
        .filter(|rule| host_cidr(&rule.ip).is_none_or(|cidr| !wanted.contains(&cidr)))
        .map(|rule| rule.ip.clone())
        .collect();
    let to_add = wanted
        .iter()
        .filter(|cidr| !present.contains(*cidr))
        .cloned()
        .collect();

    AclChanges { to_delete, to_add }
}

impl ScalewayClient {
    async fn sync_database_acl(
        &self,
        database_id: &str,
        description: &str,
        wanted: &BTreeSet<String>,
    ) -> Result<AclChanges, ProvisionError> {
        let url = self.rdb_url(&format!("instances/{database_id}/acls"));

        let current: ListAclRulesResponse = self
            .send_json(self.request(Method::GET, &url))
            .await?;
        let changes = acl_changes(description, wanted, &current.rules);

        if !changes.to_delete.is_empty() {
            let body = DeleteAclRulesRequest {
                acl_rule_ips: changes.to_delete.iter().map(String::as_str).collect(),
            };
            self.send(self.request(Method::DELETE, &url).json(&body))
                .await?;
        }
        if !changes.to_add.is_empty() {
            let body = AddAclRulesRequest {
                rules: changes
                    .to_add
                    .iter()
                    .map(|ip| AclRuleRequest { ip, description })
                    .collect(),
            };
            self.send(self.request(Method::POST, &url).json(&body))
                .await?;
        }
        Ok(changes)
    }
}

#[async_trait]
impl AclProvisioner for ScalewayClient {
    async fn update_database_acls(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
        database_ids: &[String],
    ) -> Result<(), ProvisionError> {
        if database_ids.is_empty() {
            return Ok(());
        }

        let description = format!("{ACL_RULE_DESCRIPTION_PREFIX}{node}");
        let mut wanted = BTreeSet::new();
        for address in addresses_of(addresses, EXTERNAL_IP) {
            match host_cidr(address) {
                Some(cidr) => {
                    wanted.insert(cidr);
                }
                None => warn!(node = %node, address, "Ignoring external address that is not an IP"),
            }
        }

        let mut failures = Vec::new();
        for database_id in database_ids {
            match self.sync_database_acl(database_id, &description, &wanted).await {
                Ok(changes) if changes.is_empty() => {
                    debug!(node = %node, database = database_id.as_str(), "Database ACL up to date");
                }
                Ok(changes) => info!(
                    node = %node,
                    database = database_id.as_str(),
                    added = ?changes.to_add,
                    deleted = ?changes.to_delete,
                    "Updated database ACL"
                ),
                Err(e) => failures.push(format!("database {database_id}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::Aggregate(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(ip: &str, description: Option<&str>) -> AclRule {
        AclRule {
            ip: ip.to_string(),
            description: description.map(str::to_string),
        }
    }

    fn wanted(cidrs: &[&str]) -> BTreeSet<String> {
        cidrs.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_host_cidr() {
        assert_eq!(host_cidr("51.15.0.1").as_deref(), Some("51.15.0.1/32"));
        assert_eq!(host_cidr("2001:db8::1").as_deref(), Some("2001:db8::1/128"));
        assert_eq!(host_cidr("51.15.0.1/32").as_deref(), Some("51.15.0.1/32"));
        assert_eq!(host_cidr("node-1.example.com"), None);
    }

    #[test]
    fn test_changed_address_replaces_owned_rule() {
        let current = vec![
            rule("51.15.0.1/32", Some("node:n1")),
            rule("10.0.0.0/8", Some("office")),
        ];
        let changes = acl_changes("node:n1", &wanted(&["51.15.0.2/32"]), &current);
        assert_eq!(changes.to_delete, vec!["51.15.0.1/32".to_string()]);
        assert_eq!(changes.to_add, vec!["51.15.0.2/32".to_string()]);
    }

    #[test]
    fn test_in_sync_rules_produce_no_changes() {
        let current = vec![rule("51.15.0.1/32", Some("node:n1"))];
        let changes = acl_changes("node:n1", &wanted(&["51.15.0.1/32"]), &current);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_removed_node_deletes_all_owned_rules() {
        let current = vec![
            rule("51.15.0.1/32", Some("node:n1")),
            rule("51.15.0.9/32", Some("node:n2")),
        ];
        let changes = acl_changes("node:n1", &BTreeSet::new(), &current);
        assert_eq!(changes.to_delete, vec!["51.15.0.1/32".to_string()]);
        assert!(changes.to_add.is_empty());
    }

    #[test]
    fn test_rule_owned_by_someone_else_is_not_duplicated() {
        let current = vec![rule("51.15.0.1/32", Some("manual"))];
        let changes = acl_changes("node:n1", &wanted(&["51.15.0.1/32"]), &current);
        assert!(changes.is_empty());
    }
}
