//! # Requeue Backoff
//!
//! Rate limiting for failed reconciliations.
//!
//! The delay before a node is retried is the larger of two limits:
//!
//! - a per-node exponential backoff, `base * 2^failures` capped at `max`, so a
//!   persistently failing node backs off without slowing healthy ones
//! - an overall token bucket, so a burst of failures across many nodes cannot
//!   hammer the provider APIs
//!
//! With the defaults (5ms base, 1000s cap, 10 qps, burst 100) a node is
//! retried after 5ms, 10ms, 20ms, 40ms, ... until the cap is reached.
//!
//! ## Usage
//!
//! ```rust
//! use node_sync_controller::controller::backoff::ItemExponentialBackoff;
//! use node_sync_controller::node::NodeIdentity;
//! use std::time::Duration;
//!
//! let node = NodeIdentity::new("pool-a-1");
//! let mut backoff = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(backoff.when(&node), Duration::from_millis(5));
//! assert_eq!(backoff.when(&node), Duration::from_millis(10));
//! assert_eq!(backoff.num_requeues(&node), 2);
//! ```

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_RATE_LIMIT_BURST,
    DEFAULT_RATE_LIMIT_QPS,
};
use crate::node::NodeIdentity;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Settings of the queue's rate limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// First per-node retry delay
    pub base_delay: Duration,
    /// Upper bound of the per-node retry delay
    pub max_delay: Duration,
    /// Overall retry rate, zero or negative disables the bucket
    pub qps: f64,
    /// Overall retry burst
    pub burst: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            qps: DEFAULT_RATE_LIMIT_QPS,
            burst: DEFAULT_RATE_LIMIT_BURST,
        }
    }
}

/// Per-node exponential failure backoff
///
/// Also the source of truth for how many times a node has been requeued.
#[derive(Debug, Clone)]
pub struct ItemExponentialBackoff {
    base: Duration,
    max: Duration,
    failures: HashMap<NodeIdentity, u32>,
}

impl ItemExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before the next retry of `node`, counting one more failure
    pub fn when(&mut self, node: &NodeIdentity) -> Duration {
        let failures = self.failures.entry(node.clone()).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Number of failures recorded for `node` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, node: &NodeIdentity) -> usize {
        self.failures
            .get(node)
            .map_or(0, |failures| *failures as usize)
    }

    /// Reset the failure count of `node`
    pub fn forget(&mut self, node: &NodeIdentity) {
        self.failures.remove(node);
    }
}

/// Token bucket shared by all nodes
///
/// Every retry takes one token; once the bucket is empty the retry is pushed
/// back until a token has been refilled.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "burst sizes are far below f64 precision limits"
    )]
    pub fn new(qps: f64, burst: usize, now: Instant) -> Self {
        Self {
            qps,
            burst: burst as f64,
            tokens: burst as f64,
            last: now,
        }
    }

    /// Take a token at `now`, returning how long the caller must wait for it
    pub fn reserve(&mut self, now: Instant) -> Duration {
        if self.qps <= 0.0 {
            return Duration::ZERO;
        }

        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now.max(self.last);
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst) - 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

/// Rate limiter of the reconciliation queue
#[derive(Debug, Clone)]
pub struct RateLimiter {
    items: ItemExponentialBackoff,
    bucket: TokenBucket,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            items: ItemExponentialBackoff::new(config.base_delay, config.max_delay),
            bucket: TokenBucket::new(config.qps, config.burst, Instant::now()),
        }
    }

    /// Delay before `node` may be retried; counts one more failure
    pub fn when(&mut self, node: &NodeIdentity) -> Duration {
        let item_delay = self.items.when(node);
        let bucket_delay = self.bucket.reserve(Instant::now());
        item_delay.max(bucket_delay)
    }

    #[must_use]
    pub fn num_requeues(&self, node: &NodeIdentity) -> usize {
        self.items.num_requeues(node)
    }

    pub fn forget(&mut self, node: &NodeIdentity) {
        self.items.forget(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ItemExponentialBackoff {
        ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(100))
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let node = NodeIdentity::new("n1");
        let mut backoff = backoff();

        // 5ms, 10ms, 20ms, 40ms, 80ms, then capped at 100ms
        assert_eq!(backoff.when(&node), Duration::from_millis(5));
        assert_eq!(backoff.when(&node), Duration::from_millis(10));
        assert_eq!(backoff.when(&node), Duration::from_millis(20));
        assert_eq!(backoff.when(&node), Duration::from_millis(40));
        assert_eq!(backoff.when(&node), Duration::from_millis(80));
        assert_eq!(backoff.when(&node), Duration::from_millis(100));
        assert_eq!(backoff.when(&node), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_stays_capped_for_huge_exponents() {
        let node = NodeIdentity::new("n1");
        let mut backoff = backoff();
        for _ in 0..40 {
            backoff.when(&node);
        }
        assert_eq!(backoff.when(&node), Duration::from_millis(100));
        assert_eq!(backoff.num_requeues(&node), 41);
    }

    #[test]
    fn test_forget_resets_backoff_and_requeues() {
        let node = NodeIdentity::new("n1");
        let mut backoff = backoff();
        backoff.when(&node);
        backoff.when(&node);
        assert_eq!(backoff.num_requeues(&node), 2);

        backoff.forget(&node);
        assert_eq!(backoff.num_requeues(&node), 0);
        assert_eq!(backoff.when(&node), Duration::from_millis(5));
    }

    #[test]
    fn test_backoff_is_tracked_per_node() {
        let n1 = NodeIdentity::new("n1");
        let n2 = NodeIdentity::new("n2");
        let mut backoff = backoff();

        backoff.when(&n1);
        backoff.when(&n1);
        assert_eq!(backoff.when(&n2), Duration::from_millis(5));
        assert_eq!(backoff.num_requeues(&n1), 2);
        assert_eq!(backoff.num_requeues(&n2), 1);
    }

    #[test]
    fn test_token_bucket_allows_burst_then_delays() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 2, start);

        assert_eq!(bucket.reserve(start), Duration::ZERO);
        assert_eq!(bucket.reserve(start), Duration::ZERO);
        // Third token is 100ms away at 10 qps
        let wait = bucket.reserve(start);
        assert!(
            wait >= Duration::from_millis(99) && wait <= Duration::from_millis(101),
            "expected ~100ms wait, got {wait:?}"
        );
    }

    #[test]
    fn test_token_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 1, start);

        assert_eq!(bucket.reserve(start), Duration::ZERO);
        assert_eq!(
            bucket.reserve(start + Duration::from_millis(100)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_token_bucket_disabled_with_zero_qps() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(0.0, 0, start);
        for _ in 0..10 {
            assert_eq!(bucket.reserve(start), Duration::ZERO);
        }
    }
}
