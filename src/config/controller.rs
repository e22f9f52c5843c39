//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
    DEFAULT_MAX_RETRIES, DEFAULT_METRICS_PORT, DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_QPS,
    DEFAULT_WORKERS,
};
use crate::controller::backoff::RateLimiterConfig;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent worker loops
    pub workers: usize,
    /// Failed reconciliations retried per node before the node is dropped
    pub max_retries: usize,
    /// How long start-up waits for the initial node listing (seconds)
    pub cache_sync_timeout_secs: u64,
    /// Per-node exponential backoff base (milliseconds)
    pub backoff_base_ms: u64,
    /// Per-node exponential backoff cap (seconds)
    pub backoff_max_secs: u64,
    /// Overall requeue rate (tokens per second)
    pub rate_limit_qps: f64,
    /// Overall requeue burst
    pub rate_limit_burst: usize,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            rate_limit_qps: DEFAULT_RATE_LIMIT_QPS,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            workers: env_var_or_default("WORKERS", DEFAULT_WORKERS).max(1),
            max_retries: env_var_or_default("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            cache_sync_timeout_secs: env_var_or_default(
                "CACHE_SYNC_TIMEOUT_SECS",
                DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            ),
            backoff_base_ms: env_var_or_default("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            rate_limit_qps: env_var_or_default("RATE_LIMIT_QPS", DEFAULT_RATE_LIMIT_QPS),
            rate_limit_burst: env_var_or_default("RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get the initial sync gate timeout
    #[must_use]
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    /// Rate limiter settings for the reconciliation queue
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_secs(self.backoff_max_secs),
            qps: self.rate_limit_qps,
            burst: self.rate_limit_burst,
        }
    }
}
