//! # Controller Lifecycle
//!
//! Wires the watch source, the change filter, the queue and the workers
//! together and drives them through
//! `Initializing -> Running -> ShuttingDown -> Stopped`.
//!
//! Workers are only started once the watch source has delivered its initial
//! listing. If that does not happen within the sync timeout, or a shutdown is
//! requested first, start-up is aborted with an error.

use crate::config::ControllerConfig;
use crate::constants::{CHANGE_EVENT_CHANNEL_CAPACITY, WORKER_RESTART_PERIOD_SECS};
use crate::controller::filter::ChangeFilter;
use crate::controller::orchestrator::SyncOrchestrator;
use crate::controller::queue::ReconciliationQueue;
use crate::controller::worker::Worker;
use crate::node::WatchSource;
use crate::observability::EventRecorder;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl ControllerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("timed out after {0:?} waiting for the node cache to sync")]
    CacheSyncTimeout(Duration),
    #[error("shutdown requested before the node cache synced")]
    CancelledBeforeSync,
    #[error("node watch ended unexpectedly")]
    WatchEnded,
}

pub struct Controller {
    queue: ReconciliationQueue,
    orchestrator: Arc<SyncOrchestrator>,
    recorder: Arc<dyn EventRecorder>,
    workers: usize,
    max_retries: usize,
    cache_sync_timeout: Duration,
    worker_restart_period: Duration,
    state: watch::Sender<ControllerState>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.workers)
            .field("max_retries", &self.max_retries)
            .field("cache_sync_timeout", &self.cache_sync_timeout)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[must_use]
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        recorder: Arc<dyn EventRecorder>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            queue: ReconciliationQueue::new(config.rate_limiter()),
            orchestrator,
            recorder,
            workers: config.workers.max(1),
            max_retries: config.max_retries,
            cache_sync_timeout: config.cache_sync_timeout(),
            worker_restart_period: Duration::from_secs(WORKER_RESTART_PERIOD_SECS),
            state: watch::Sender::new(ControllerState::Initializing),
        }
    }

    /// Follow the lifecycle state, e.g. for readiness probes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped)
    ///
    /// # Errors
    /// Returns an error if start-up is aborted before the node cache synced,
    /// or if the watch source ends on its own while running.
    pub async fn run(
        self,
        source: Box<dyn WatchSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        self.set_state(ControllerState::Initializing);

        let (events_tx, events_rx) = mpsc::channel(CHANGE_EVENT_CHANNEL_CAPACITY);
        let (synced_tx, synced_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut source_task = tokio::spawn(source.run(events_tx, synced_tx, stop_rx));
        let filter_task = tokio::spawn(ChangeFilter::new(self.queue.clone()).run(events_rx));

        info!(timeout = ?self.cache_sync_timeout, "Waiting for node cache to sync");
        if let Err(e) = self.wait_for_sync(synced_rx, &mut shutdown).await {
            error!(error = %e, "Aborting controller start-up");
            self.stop(&stop_tx, Some(source_task), filter_task, Vec::new())
                .await;
            return Err(e);
        }

        self.set_state(ControllerState::Running);
        let workers = self.start_workers();
        info!(workers = workers.len(), "Started workers");

        let mut source_finished = false;
        let result = tokio::select! {
            () = shutdown_requested(&mut shutdown) => {
                info!("Shutdown signal received");
                Ok(())
            }
            joined = &mut source_task => {
                if let Err(e) = joined {
                    error!(error = %e, "Node watch task failed");
                }
                source_finished = true;
                Err(ControllerError::WatchEnded)
            }
        };

        self.set_state(ControllerState::ShuttingDown);
        self.stop(&stop_tx, (!source_finished).then_some(source_task), filter_task, workers)
            .await;
        result
    }

    async fn wait_for_sync(
        &self,
        mut synced: watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        let timeout = self.cache_sync_timeout;
        tokio::select! {
            biased;
            // The Ref returned by wait_for must not outlive this block
            result = async { synced.wait_for(|synced| *synced).await.map(|_| ()) } => {
                result.map_err(|_closed| ControllerError::WatchEnded)
            }
            () = shutdown_requested(shutdown) => Err(ControllerError::CancelledBeforeSync),
            () = tokio::time::sleep(timeout) => Err(ControllerError::CacheSyncTimeout(timeout)),
        }
    }

    fn start_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|id| {
                let worker = Worker::new(
                    self.queue.clone(),
                    Arc::clone(&self.orchestrator),
                    Arc::clone(&self.recorder),
                    self.max_retries,
                );
                tokio::spawn(
                    supervise(worker, self.worker_restart_period)
                        .instrument(info_span!("controller.worker", worker = id)),
                )
            })
            .collect()
    }

    async fn stop(
        &self,
        stop_source: &watch::Sender<bool>,
        source_task: Option<JoinHandle<()>>,
        filter_task: JoinHandle<()>,
        workers: Vec<JoinHandle<()>>,
    ) {
        stop_source.send_replace(true);
        self.queue.shut_down();

        if let Some(task) = source_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Node watch task failed during shutdown");
            }
        }
        // The source dropped its sender, so the filter drains and exits
        if let Err(e) = filter_task.await {
            warn!(error = %e, "Change filter task failed during shutdown");
        }
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed during shutdown");
            }
        }

        self.set_state(ControllerState::Stopped);
        info!("Controller stopped");
    }

    fn set_state(&self, state: ControllerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Controller state changed");
        }
    }
}

/// Resolves once shutdown is requested; a dropped sender counts as a request
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Run `worker` until the queue shuts down, restarting it after a panic
async fn supervise(worker: Worker, restart_period: Duration) {
    loop {
        let attempt = worker.clone();
        match tokio::spawn(async move { attempt.run().await }.in_current_span()).await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                error!(
                    restart_in = ?restart_period,
                    "Worker panicked, restarting"
                );
                tokio::time::sleep(restart_period).await;
            }
            Err(_) => return,
        }
    }
}
