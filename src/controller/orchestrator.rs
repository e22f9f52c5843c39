//! # Sync Orchestrator
//!
//! Runs one reconciliation pass for a node: reads its current addresses, then
//! syncs the reserved IP, the reverse DNS records and the database ACLs, in
//! that order.
//!
//! Targets are independent. A failing target is recorded and the next one is
//! still attempted; the pass only succeeds when all three did.

use crate::config::SyncSettings;
use crate::node::{NodeAddress, NodeIdentity, NodeLookup};
use crate::observability::metrics;
use crate::provider::{
    AclProvisioner, ProvisionError, ReservedIpProvisioner, ReverseDnsProvisioner,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, Instrument};

/// One of the external resources kept in sync for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncTarget {
    ReservedIp,
    ReverseDns,
    DatabaseAcl,
}

impl SyncTarget {
    pub const ALL: [Self; 3] = [Self::ReservedIp, Self::ReverseDns, Self::DatabaseAcl];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReservedIp => "reserved-ip",
            Self::ReverseDns => "reverse-dns",
            Self::DatabaseAcl => "database-acl",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub target: SyncTarget,
    pub message: String,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    failures: Vec<SyncFailure>,
}

impl SyncOutcome {
    /// Every target failed for the same reason
    #[must_use]
    pub fn all_failed(message: &str) -> Self {
        Self {
            failures: SyncTarget::ALL
                .into_iter()
                .map(|target| SyncFailure {
                    target,
                    message: message.to_string(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[SyncFailure] {
        &self.failures
    }

    #[must_use]
    pub fn failed_targets(&self) -> Vec<SyncTarget> {
        self.failures.iter().map(|f| f.target).collect()
    }

    fn record(
        &mut self,
        node: &NodeIdentity,
        target: SyncTarget,
        result: Result<(), ProvisionError>,
    ) {
        match result {
            Ok(()) => debug!(node = %node, target = target.as_str(), "Target in sync"),
            Err(e) => {
                error!(
                    node = %node,
                    target = target.as_str(),
                    error = %e,
                    "Failed to sync {} for node {}", target, node
                );
                metrics::increment_sync_target_failures(target.as_str());
                self.failures.push(SyncFailure {
                    target,
                    message: e.to_string(),
                });
            }
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("success");
        }
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.target, failure.message)?;
        }
        Ok(())
    }
}

/// Invokes the three provisioners for a node
#[derive(Clone)]
pub struct SyncOrchestrator {
    lookup: Arc<dyn NodeLookup>,
    reserved_ip: Arc<dyn ReservedIpProvisioner>,
    reverse_dns: Arc<dyn ReverseDnsProvisioner>,
    acl: Arc<dyn AclProvisioner>,
    settings: Arc<SyncSettings>,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        lookup: Arc<dyn NodeLookup>,
        reserved_ip: Arc<dyn ReservedIpProvisioner>,
        reverse_dns: Arc<dyn ReverseDnsProvisioner>,
        acl: Arc<dyn AclProvisioner>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            lookup,
            reserved_ip,
            reverse_dns,
            acl,
            settings: Arc::new(settings),
        }
    }

    /// Bring every external resource of `node` in line with its current state
    ///
    /// A node that no longer exists is reconciled with no addresses, which
    /// lets the provisioners clean up after it.
    pub async fn reconcile(&self, node: &NodeIdentity) -> SyncOutcome {
        let span = info_span!("controller.reconcile", node = %node);
        async move {
            let start = Instant::now();
            metrics::increment_reconciliations();

            let outcome = match self.lookup.addresses(node).await {
                Ok(addresses) => {
                    let addresses = addresses.unwrap_or_else(|| {
                        debug!(node = %node, "Node no longer exists, reconciling removal");
                        Vec::new()
                    });
                    self.sync_targets(node, &addresses).await
                }
                Err(e) => {
                    error!(node = %node, error = %e, "Failed to look up node");
                    SyncOutcome::all_failed(&format!("node lookup failed: {e:#}"))
                }
            };

            metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            if !outcome.is_success() {
                metrics::increment_reconciliation_failures();
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn sync_targets(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        let result = self.reserved_ip.assign_reserved_ip(node, addresses).await;
        outcome.record(node, SyncTarget::ReservedIp, result);

        let result = self
            .reverse_dns
            .set_reverse_record(node, addresses, self.settings.reverse_ip_domain.as_deref())
            .await;
        outcome.record(node, SyncTarget::ReverseDns, result);

        let result = self
            .acl
            .update_database_acls(node, addresses, &self.settings.database_ids)
            .await;
        outcome.record(node, SyncTarget::DatabaseAcl, result);

        outcome
    }
}
