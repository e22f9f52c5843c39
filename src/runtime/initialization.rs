//! # Initialization
//!
//! Builds the controller from the environment: rustls, tracing, metrics,
//! the HTTP server, the Kubernetes client and the Scaleway provisioners.

use crate::config::{ControllerConfig, ScalewayConfig, SyncSettings};
use crate::controller::server::{start_server, ServerState};
use crate::controller::{Controller, SyncOrchestrator};
use crate::node::{KubeNodeLookup, KubeNodeWatcher, NodeLookup, WatchSource};
use crate::observability::{self, TracingRecorder};
use crate::provider::scaleway::ScalewayClient;
use crate::provider::{AclProvisioner, ReservedIpProvisioner, ReverseDnsProvisioner};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything `main` needs to run the controller
pub struct InitializationResult {
    pub controller: Controller,
    pub source: Box<dyn WatchSource>,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
/// Returns an error if tracing, metrics, the Kubernetes client or the
/// Scaleway client cannot be set up
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    observability::logging::init_tracing(&config)?;

    if !install_crypto_provider() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Node Sync Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let settings = SyncSettings::from_env();
    if settings.reverse_ip_domain.is_none() {
        info!("Reverse DNS sync disabled (REVERSE_IP_DOMAIN not set)");
    }
    if settings.database_ids.is_empty() {
        info!("Database ACL sync disabled (DATABASE_IDS not set)");
    }
    if settings.reserved_ips.is_empty() {
        info!("Reserved IP sync disabled (RESERVED_IPS_POOL not set)");
    }

    let scaleway_config =
        ScalewayConfig::from_env().context("Failed to load Scaleway configuration")?;
    info!(
        zone = scaleway_config.zone.as_str(),
        region = scaleway_config.region.as_str(),
        "Using Scaleway API"
    );
    let scaleway = Arc::new(
        ScalewayClient::new(scaleway_config, settings.reserved_ips.clone())
            .context("Failed to create Scaleway client")?,
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let orchestrator = Arc::new(scaleway_orchestrator(
        Arc::new(KubeNodeLookup::new(client.clone())),
        scaleway,
        settings,
    ));
    let controller = Controller::new(orchestrator, Arc::new(TracingRecorder), &config);

    let server_state = Arc::new(ServerState {
        controller_state: controller.subscribe_state(),
    });
    let port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!(
        workers = config.workers,
        max_retries = config.max_retries,
        "Controller initialized"
    );

    Ok(InitializationResult {
        controller,
        source: Box::new(KubeNodeWatcher::new(client)),
        server_handle,
    })
}

/// Install the ring provider rustls 0.23 needs before any TLS connection
///
/// Returns `false` if a provider was already installed for this process.
pub fn install_crypto_provider() -> bool {
    rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok()
}

/// Orchestrator with one Scaleway client backing all three sync targets
#[must_use]
pub fn scaleway_orchestrator(
    lookup: Arc<dyn NodeLookup>,
    scaleway: Arc<ScalewayClient>,
    settings: SyncSettings,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        lookup,
        Arc::clone(&scaleway) as Arc<dyn ReservedIpProvisioner>,
        Arc::clone(&scaleway) as Arc<dyn ReverseDnsProvisioner>,
        scaleway as Arc<dyn AclProvisioner>,
        settings,
    )
}
