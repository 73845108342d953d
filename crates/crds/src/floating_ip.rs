//! FloatingIP CRD
//!
//! Requests a floating IP from a pool, optionally a specific address.

use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the project a FloatingIP is charged against
pub const PROJECT_LABEL: &str = "rancher.k8s.binbash.org/project-name";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rancher.k8s.binbash.org",
    version = "v1beta1",
    kind = "FloatingIP",
    namespaced,
    status = "FloatingIPStatus"
)]
pub struct FloatingIPSpec {
    /// Name of the FloatingIPPool to allocate from
    #[serde(rename = "floatingIPPool")]
    pub floating_ip_pool: String,

    /// Specific address requested (any free address when absent)
    #[serde(rename = "ipAddr", default, skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPStatus {
    /// Address assigned by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned: Option<String>,
}

impl FloatingIP {
    /// Project this request is charged against (empty when unlabelled)
    pub fn project(&self) -> &str {
        self.labels()
            .get(PROJECT_LABEL)
            .map_or("", String::as_str)
    }
}
