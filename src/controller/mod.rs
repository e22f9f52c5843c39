//! # Controller
//!
//! Core modules of the node sync controller.
//!
//! - `backoff`: per-node exponential backoff and overall requeue rate limit
//! - `filter`: decides which node changes need a reconciliation
//! - `lifecycle`: start-up sync gate, workers and coordinated shutdown
//! - `orchestrator`: one reconciliation pass over the three sync targets
//! - `queue`: deduplicating, rate-limited reconciliation queue
//! - `server`: HTTP server for metrics and health checks
//! - `worker`: worker loop and retry decisions

pub mod backoff;
pub mod filter;
pub mod lifecycle;
pub mod orchestrator;
pub mod queue;
pub mod server;
pub mod worker;

pub use filter::ChangeFilter;
pub use lifecycle::{Controller, ControllerError, ControllerState};
pub use orchestrator::{SyncFailure, SyncOrchestrator, SyncOutcome, SyncTarget};
pub use queue::ReconciliationQueue;
pub use worker::Worker;
