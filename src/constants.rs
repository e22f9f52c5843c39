//! # Constants
//!
//! Shared defaults for the controller. Every value can be overridden through
//! the environment, see [`crate::config::ControllerConfig`].

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Number of worker loops pulling from the reconciliation queue
pub const DEFAULT_WORKERS: usize = 1;

/// Failed reconciliations retried per node before it is dropped
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// How long start-up waits for the initial node listing (seconds)
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 120;

/// Per-node exponential backoff base (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Per-node exponential backoff cap (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Overall requeue rate limit (tokens per second)
pub const DEFAULT_RATE_LIMIT_QPS: f64 = 10.0;

/// Overall requeue burst size
pub const DEFAULT_RATE_LIMIT_BURST: usize = 100;

/// Delay before a crashed worker loop is started again (seconds)
pub const WORKER_RESTART_PERIOD_SECS: u64 = 1;

/// Capacity of the channel between the watch source and the change filter
pub const CHANGE_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default Scaleway API endpoint
pub const DEFAULT_SCW_API_URL: &str = "https://api.scaleway.com";

/// Default Scaleway zone for instance and flexible IP calls
pub const DEFAULT_SCW_ZONE: &str = "fr-par-1";

/// Default Scaleway region for managed database calls
pub const DEFAULT_SCW_REGION: &str = "fr-par";

/// Description prefix marking database ACL rules owned by this controller
pub const ACL_RULE_DESCRIPTION_PREFIX: &str = "node:";
