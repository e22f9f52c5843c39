//! Scaleway API payloads
//!
//! Only the fields the provisioners read or write are modelled; unknown
//! fields are ignored.

use serde::{Deserialize, Serialize};

/// Error body returned by every Scaleway API on failure
#[derive(Debug, Deserialize)]
pub(crate) struct ScalewayErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Public IP as listed on a server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerIp {
    pub id: String,
    pub address: String,
}

/// Instance server (`GET /instance/v1/zones/{zone}/servers`)
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public_ips: Vec<ServerIp>,
    /// Legacy single-IP field, only used when `public_ips` is empty
    #[serde(default)]
    pub public_ip: Option<ServerIp>,
}

impl Server {
    /// Every public IP attached to the server
    #[must_use]
    pub fn public_ips(&self) -> Vec<&ServerIp> {
        if self.public_ips.is_empty() {
            self.public_ip.iter().collect()
        } else {
            self.public_ips.iter().collect()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListServersResponse {
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// Server reference embedded in a flexible IP
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpServerRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Flexible IP (`GET /instance/v1/zones/{zone}/ips/{id}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlexibleIp {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub reverse: Option<String>,
    #[serde(default)]
    pub server: Option<IpServerRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlexibleIpResponse {
    pub ip: FlexibleIp,
}

/// `PATCH /instance/v1/zones/{zone}/ips/{id}` body
#[derive(Debug, Default, Serialize)]
pub(crate) struct UpdateIpRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse: Option<&'a str>,
}

/// Database ACL rule (`GET /rdb/v1/regions/{region}/instances/{id}/acls`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AclRule {
    pub ip: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListAclRulesResponse {
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AclRuleRequest<'a> {
    pub ip: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddAclRulesRequest<'a> {
    pub rules: Vec<AclRuleRequest<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteAclRulesRequest<'a> {
    pub acl_rule_ips: Vec<&'a str>,
}
