//! # Node Sync Controller
//!
//! Entry point: loads configuration, builds the controller and runs it until
//! SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use node_sync_controller::config::ControllerConfig;
use node_sync_controller::runtime::{initialization, signals};
use tracing::{error, info};

/// Keeps Scaleway reserved IPs, reverse DNS and database ACLs in sync with
/// cluster nodes
#[derive(Debug, Parser)]
#[command(name = "node-sync-controller", version, about)]
struct Args {
    /// Number of concurrent workers
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// Retries per node before it is dropped
    #[arg(long, env = "MAX_RETRIES")]
    max_retries: Option<usize>,

    /// Port for metrics and probes
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log format (json, text)
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn controller_config(self) -> ControllerConfig {
        let mut config = ControllerConfig::from_env();
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().controller_config();

    let init = initialization::initialize(config).await?;
    let shutdown = signals::shutdown_signal();

    let result = init.controller.run(init.source, shutdown).await;
    init.server_handle.abort();

    match result {
        Ok(()) => {
            info!("Node Sync Controller exited cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Node Sync Controller failed");
            Err(e.into())
        }
    }
}
