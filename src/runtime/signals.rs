//! # Signals
//!
//! Turns SIGINT and SIGTERM into a `watch` shutdown signal shared by every
//! component.

use tokio::sync::watch;
use tracing::{error, info};

/// Spawn the signal listener and return the shutdown receiver
#[must_use]
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        tx.send_replace(true);
        // Keep the sender alive so receivers see the value, not a closed channel
        tx.closed().await;
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, listening for SIGINT only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for SIGINT");
                terminate.recv().await;
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
