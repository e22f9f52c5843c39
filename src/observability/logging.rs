//! # Logging
//!
//! Installs the global tracing subscriber. `RUST_LOG` takes precedence over
//! the configured level.

use crate::config::ControllerConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set
#[must_use]
pub fn default_directive(log_level: &str) -> String {
    let level = match log_level.trim().to_ascii_lowercase().as_str() {
        level @ ("error" | "warn" | "info" | "debug" | "trace") => level.to_string(),
        _ => "info".to_string(),
    };
    format!("node_sync_controller={level}")
}

/// Install the global subscriber
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init_tracing(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(&config.log_level).into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.log_format.eq_ignore_ascii_case("text") {
        builder.try_init()
    } else {
        builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_normalizes_level() {
        assert_eq!(default_directive("DEBUG"), "node_sync_controller=debug");
        assert_eq!(default_directive(" warn "), "node_sync_controller=warn");
        assert_eq!(default_directive("verbose"), "node_sync_controller=info");
    }
}
