//! # Scaleway Configuration
//!
//! Credentials for the Scaleway API and the resources kept in sync with the
//! cluster nodes. Missing resource keys disable the matching sync target.

use super::{env_var_non_empty, env_var_or_default_str, split_list};
use crate::constants::{DEFAULT_SCW_API_URL, DEFAULT_SCW_REGION, DEFAULT_SCW_ZONE};
use thiserror::Error;

/// Environment key holding the reverse DNS domain suffix
pub const REVERSE_IP_DOMAIN_ENV: &str = "REVERSE_IP_DOMAIN";
/// Environment key holding the managed database instance IDs
pub const DATABASE_IDS_ENV: &str = "DATABASE_IDS";
/// Environment key holding the reserved IP pool
pub const RESERVED_IPS_POOL_ENV: &str = "RESERVED_IPS_POOL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

/// What the controller keeps in sync for every node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSettings {
    /// Domain suffix of reverse DNS records, `None` disables reverse DNS sync
    pub reverse_ip_domain: Option<String>,
    /// Database instances whose ACLs allow node addresses
    pub database_ids: Vec<String>,
    /// Flexible IP IDs available for assignment to nodes
    pub reserved_ips: Vec<String>,
}

impl SyncSettings {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            reverse_ip_domain: env_var_non_empty(REVERSE_IP_DOMAIN_ENV),
            database_ids: env_var_non_empty(DATABASE_IDS_ENV)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            reserved_ips: env_var_non_empty(RESERVED_IPS_POOL_ENV)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
        }
    }
}

/// Scaleway API access
#[derive(Clone)]
pub struct ScalewayConfig {
    pub secret_key: String,
    pub zone: String,
    pub region: String,
    pub api_url: String,
}

impl std::fmt::Debug for ScalewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayConfig")
            .field("zone", &self.zone)
            .field("region", &self.region)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl ScalewayConfig {
    /// Load the API settings from the standard `SCW_*` variables
    ///
    /// # Errors
    /// Returns an error if `SCW_SECRET_KEY` is not set
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret_key: env_var_non_empty("SCW_SECRET_KEY")
                .ok_or(ConfigError::Missing("SCW_SECRET_KEY"))?,
            zone: env_var_or_default_str("SCW_DEFAULT_ZONE", DEFAULT_SCW_ZONE),
            region: env_var_or_default_str("SCW_DEFAULT_REGION", DEFAULT_SCW_REGION),
            api_url: env_var_or_default_str("SCW_API_URL", DEFAULT_SCW_API_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }
}
