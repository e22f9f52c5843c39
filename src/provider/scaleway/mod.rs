//! # Scaleway Provider
//!
//! REST client for the Scaleway Instance and Managed Database APIs, backing
//! all three provisioner traits.
//!
//! - `reserved_ip`: flexible IP assignment from a fixed pool
//! - `reverse_dns`: reverse records of the node's public IPs
//! - `acl`: managed database ACL rules for node addresses
//!
//! References:
//! - [Instance API](https://www.scaleway.com/en/developers/api/instance/)
//! - [Managed Database API](https://www.scaleway.com/en/developers/api/managed-database-postgre-mysql/)

mod acl;
mod reserved_ip;
pub mod responses;
mod reverse_dns;

pub use acl::{acl_changes, host_cidr, AclChanges};
pub use reserved_ip::{pick_reserved_ip, Assignment};
pub use reverse_dns::reverse_name;

use crate::config::ScalewayConfig;
use crate::provider::ProvisionError;
use reqwest::{Client, Method, RequestBuilder};
use responses::{
    FlexibleIp, FlexibleIpResponse, ListServersResponse, ScalewayErrorResponse, Server,
    UpdateIpRequest,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ScalewayClient {
    http: Client,
    config: ScalewayConfig,
    reserved_ips: Vec<String>,
    /// Serializes pool assignment so two workers never grab the same free IP
    assignment: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ScalewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayClient")
            .field("config", &self.config)
            .field("reserved_ips", &self.reserved_ips)
            .finish_non_exhaustive()
    }
}

impl ScalewayClient {
    /// Create a client for `config`, assigning IPs from `reserved_ips`
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: ScalewayConfig, reserved_ips: Vec<String>) -> Result<Self, ProvisionError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            reserved_ips,
            assignment: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ScalewayConfig {
        &self.config
    }

    fn instance_url(&self, path: &str) -> String {
        format!(
            "{}/instance/v1/zones/{}/{}",
            self.config.api_url, self.config.zone, path
        )
    }

    fn rdb_url(&self, path: &str) -> String {
        format!(
            "{}/rdb/v1/regions/{}/{}",
            self.config.api_url, self.config.region, path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("X-Auth-Token", &self.config.secret_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ProvisionError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ScalewayErrorResponse>(&body) {
            Ok(error) => match error.kind {
                Some(kind) => format!("{} ({kind})", error.message),
                None => error.message,
            },
            Err(_parse) => body,
        };
        Err(ProvisionError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProvisionError> {
        Ok(self.send(request).await?.json::<T>().await?)
    }

    /// Instance server named exactly `name`
    ///
    /// The API filter matches on substrings, so results are narrowed here.
    pub(crate) async fn find_server(&self, name: &str) -> Result<Option<Server>, ProvisionError> {
        let request = self
            .request(Method::GET, &self.instance_url("servers"))
            .query(&[("name", name)]);
        let response: ListServersResponse = self.send_json(request).await?;
        let server = response.servers.into_iter().find(|s| s.name == name);
        debug!(node = name, found = server.is_some(), "Looked up instance server");
        Ok(server)
    }

    pub(crate) async fn get_ip(&self, ip_id: &str) -> Result<FlexibleIp, ProvisionError> {
        let request = self.request(Method::GET, &self.instance_url(&format!("ips/{ip_id}")));
        let response: FlexibleIpResponse = self.send_json(request).await?;
        Ok(response.ip)
    }

    pub(crate) async fn update_ip(
        &self,
        ip_id: &str,
        update: &UpdateIpRequest<'_>,
    ) -> Result<FlexibleIp, ProvisionError> {
        let request = self
            .request(Method::PATCH, &self.instance_url(&format!("ips/{ip_id}")))
            .json(update);
        let response: FlexibleIpResponse = self.send_json(request).await?;
        Ok(response.ip)
    }
}
