//! Common test utilities
//!
//! In-memory doubles of the controller's collaborators: a node lookup, a
//! provisioner recording every call, a recorder collecting worker reports and
//! a scripted watch source.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use node_sync_controller::config::{ControllerConfig, SyncSettings};
use node_sync_controller::controller::{SyncOrchestrator, SyncOutcome, SyncTarget};
use node_sync_controller::node::{ChangeEvent, NodeAddress, NodeIdentity, NodeLookup, WatchSource};
use node_sync_controller::observability::EventRecorder;
use node_sync_controller::provider::{
    AclProvisioner, ProvisionError, ReservedIpProvisioner, ReverseDnsProvisioner,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn node(name: &str) -> NodeIdentity {
    NodeIdentity::new(name)
}

pub fn addresses(pairs: &[(&str, &str)]) -> Vec<NodeAddress> {
    pairs
        .iter()
        .map(|(kind, address)| NodeAddress::new(kind, address))
        .collect()
}

/// Controller settings with millisecond backoff and no overall rate limit
pub fn fast_config(workers: usize, max_retries: usize) -> ControllerConfig {
    ControllerConfig {
        workers,
        max_retries,
        cache_sync_timeout_secs: 5,
        backoff_base_ms: 1,
        backoff_max_secs: 1,
        rate_limit_qps: 0.0,
        rate_limit_burst: 0,
        ..ControllerConfig::default()
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        reverse_ip_domain: Some("k8s.example.com".to_string()),
        database_ids: vec!["db-1".to_string()],
        reserved_ips: vec!["ip-1".to_string()],
    }
}

/// Node lookup backed by a map
#[derive(Debug, Default)]
pub struct StaticLookup {
    nodes: Mutex<HashMap<String, Vec<NodeAddress>>>,
    failing: AtomicBool,
}

impl StaticLookup {
    pub fn set(&self, name: &str, addresses: Vec<NodeAddress>) {
        self.nodes
            .lock()
            .expect("lookup lock")
            .insert(name.to_string(), addresses);
    }

    pub fn remove(&self, name: &str) {
        self.nodes.lock().expect("lookup lock").remove(name);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeLookup for StaticLookup {
    async fn addresses(&self, identity: &NodeIdentity) -> anyhow::Result<Option<Vec<NodeAddress>>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("api server unavailable");
        }
        Ok(self
            .nodes
            .lock()
            .expect("lookup lock")
            .get(identity.as_str())
            .cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: SyncTarget,
    pub node: String,
    pub addresses: Vec<NodeAddress>,
}

/// Provisioner double for all three targets
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<(String, SyncTarget)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: Mutex<HashSet<String>>,
    overlap: AtomicBool,
    panic_next: AtomicBool,
    hold: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl RecordingProvisioner {
    pub fn fail(&self, node: &str, target: SyncTarget) {
        self.failing
            .lock()
            .expect("failing lock")
            .insert((node.to_string(), target));
    }

    pub fn fail_all(&self, node: &str) {
        for target in SyncTarget::ALL {
            self.fail(node, target);
        }
    }

    pub fn heal(&self, node: &str) {
        self.failing
            .lock()
            .expect("failing lock")
            .retain(|(n, _)| n != node);
    }

    /// Make every reserved IP call take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    /// Block the next reserved IP call until the returned sender fires
    ///
    /// The returned receiver resolves once that call has started.
    pub fn hold_next_call(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.hold.lock().expect("hold lock") = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Make the next reserved IP call panic before recording anything
    pub fn panic_next_call(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, node: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.node == node)
            .collect()
    }

    /// Number of reconciliation passes that reached the first target
    pub fn passes_for(&self, node: &str) -> usize {
        self.calls_for(node)
            .iter()
            .filter(|call| call.target == SyncTarget::ReservedIp)
            .count()
    }

    /// Whether two passes for the same node ever ran at the same time
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    fn record(
        &self,
        target: SyncTarget,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
    ) -> Result<(), ProvisionError> {
        self.calls.lock().expect("calls lock").push(Call {
            target,
            node: node.to_string(),
            addresses: addresses.to_vec(),
        });
        let failing = self
            .failing
            .lock()
            .expect("failing lock")
            .contains(&(node.to_string(), target));
        if failing {
            Err(ProvisionError::Aggregate(format!("{target} unavailable")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReservedIpProvisioner for RecordingProvisioner {
    async fn assign_reserved_ip(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
    ) -> Result<(), ProvisionError> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("reserved IP provisioner crashed for {node}");
        }
        if !self
            .in_flight
            .lock()
            .expect("in flight lock")
            .insert(node.to_string())
        {
            self.overlap.store(true, Ordering::SeqCst);
        }

        let hold = self.hold.lock().expect("hold lock").take();
        if let Some((entered, release)) = hold {
            let _ = entered.send(());
            let _ = release.await;
        }
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight
            .lock()
            .expect("in flight lock")
            .remove(node.as_str());
        self.record(SyncTarget::ReservedIp, node, addresses)
    }
}

#[async_trait]
impl ReverseDnsProvisioner for RecordingProvisioner {
    async fn set_reverse_record(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
        _domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        self.record(SyncTarget::ReverseDns, node, addresses)
    }
}

#[async_trait]
impl AclProvisioner for RecordingProvisioner {
    async fn update_database_acls(
        &self,
        node: &NodeIdentity,
        addresses: &[NodeAddress],
        _database_ids: &[String],
    ) -> Result<(), ProvisionError> {
        self.record(SyncTarget::DatabaseAcl, node, addresses)
    }
}

pub fn orchestrator(
    lookup: &Arc<StaticLookup>,
    provisioner: &Arc<RecordingProvisioner>,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        Arc::clone(lookup) as Arc<dyn NodeLookup>,
        Arc::clone(provisioner) as Arc<dyn ReservedIpProvisioner>,
        Arc::clone(provisioner) as Arc<dyn ReverseDnsProvisioner>,
        Arc::clone(provisioner) as Arc<dyn AclProvisioner>,
        settings(),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Reconciled(String),
    Retry { node: String, attempt: usize },
    Terminal { node: String, failed: Vec<SyncTarget> },
}

/// Recorder keeping every report in memory
#[derive(Debug, Default)]
pub struct CollectingRecorder {
    reports: Mutex<Vec<Report>>,
}

impl CollectingRecorder {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().expect("reports lock").clone()
    }

    pub fn reconciled(&self, node: &str) -> bool {
        self.reports()
            .contains(&Report::Reconciled(node.to_string()))
    }

    pub fn terminal_failures(&self) -> Vec<Report> {
        self.reports()
            .into_iter()
            .filter(|r| matches!(r, Report::Terminal { .. }))
            .collect()
    }

    fn push(&self, report: Report) {
        self.reports.lock().expect("reports lock").push(report);
    }
}

impl EventRecorder for CollectingRecorder {
    fn reconciled(&self, node: &NodeIdentity) {
        self.push(Report::Reconciled(node.to_string()));
    }

    fn retry_scheduled(
        &self,
        node: &NodeIdentity,
        attempt: usize,
        _delay: Duration,
        _outcome: &SyncOutcome,
    ) {
        self.push(Report::Retry {
            node: node.to_string(),
            attempt,
        });
    }

    fn terminal_failure(&self, node: &NodeIdentity, outcome: &SyncOutcome) {
        self.push(Report::Terminal {
            node: node.to_string(),
            failed: outcome.failed_targets(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBehavior {
    /// Deliver the initial events, then report synced
    Sync,
    /// Deliver the initial events, never report synced
    Never,
    /// Return immediately without syncing
    EndImmediately,
}

/// Watch source replaying a fixed listing, then forwarding `feed`
#[derive(Debug)]
pub struct ScriptedSource {
    pub initial: Vec<ChangeEvent>,
    pub feed: Option<mpsc::Receiver<ChangeEvent>>,
    pub behavior: SyncBehavior,
}

impl ScriptedSource {
    pub fn new(initial: Vec<ChangeEvent>, behavior: SyncBehavior) -> Self {
        Self {
            initial,
            feed: None,
            behavior,
        }
    }

    pub fn with_feed(mut self, feed: mpsc::Receiver<ChangeEvent>) -> Self {
        self.feed = Some(feed);
        self
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[async_trait]
impl WatchSource for ScriptedSource {
    async fn run(
        self: Box<Self>,
        events: mpsc::Sender<ChangeEvent>,
        synced: watch::Sender<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Self {
            initial,
            feed,
            behavior,
        } = *self;
        if behavior == SyncBehavior::EndImmediately {
            return;
        }

        for event in initial {
            if events.send(event).await.is_err() {
                return;
            }
        }
        if behavior == SyncBehavior::Sync {
            synced.send_replace(true);
        }

        let Some(mut feed) = feed else {
            stopped(&mut shutdown).await;
            return;
        };
        loop {
            let next = tokio::select! {
                () = stopped(&mut shutdown) => return,
                next = feed.recv() => next,
            };
            match next {
                Some(event) => {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                None => {
                    stopped(&mut shutdown).await;
                    return;
                }
            }
        }
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
