//! FloatingIPPool CRD
//!
//! Cluster-scoped pool of floating IPs: a subnet, an inclusive start/end
//! range inside it and a list of addresses that must never be handed out.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rancher.k8s.binbash.org",
    version = "v1beta1",
    kind = "FloatingIPPool",
    status = "FloatingIPPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPPoolSpec {
    /// Address configuration of the pool
    #[serde(default)]
    pub ip_config: IPConfig,
}

/// Subnet and allocatable range of a pool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IPConfig {
    /// Subnet in CIDR notation (e.g., "192.168.1.0/24")
    #[serde(default)]
    pub subnet: String,

    /// Allocatable range inside the subnet
    #[serde(default)]
    pub pool: Pool,
}

/// Inclusive allocation range
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// First allocatable address
    #[serde(default)]
    pub start: String,

    /// Last allocatable address (inclusive)
    #[serde(default)]
    pub end: String,

    /// Addresses inside the range that are never allocated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPPoolStatus {
    /// Allocated addresses, keyed by IP, valued by owner (`namespace/name`)
    #[serde(default)]
    pub allocated: BTreeMap<String, String>,

    /// Number of addresses still available for allocation
    #[serde(default)]
    pub available: i64,
}

impl FloatingIPPool {
    /// Returns the number of free addresses recorded in the status (0 without status)
    pub fn available(&self) -> i64 {
        self.status.as_ref().map_or(0, |s| s.available)
    }

    /// Returns true if `ip` is recorded as allocated
    pub fn is_allocated(&self, ip: &str) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.allocated.contains_key(ip))
    }
}
