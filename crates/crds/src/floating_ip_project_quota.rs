//! FloatingIPProjectQuota CRD
//!
//! Per-project, per-pool cap on allocated floating IPs. The object name is
//! the project identifier.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rancher.k8s.binbash.org",
    version = "v1beta1",
    kind = "FloatingIPProjectQuota",
    status = "FloatingIPProjectQuotaStatus"
)]
pub struct FloatingIPProjectQuotaSpec {
    /// Quota per pool name
    #[serde(rename = "floatingIPQuota", default)]
    pub floating_ip_quota: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct FloatingIPProjectQuotaStatus {
    /// Usage per pool name
    #[serde(rename = "floatingIPs", default)]
    pub floating_ips: BTreeMap<String, FipInfo>,
}

/// Usage of a single pool by a project
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct FipInfo {
    /// Number of floating IPs currently allocated
    #[serde(default)]
    pub used: i64,
}

impl FloatingIPProjectQuota {
    /// Quota defined for `pool`, if any
    pub fn quota_for(&self, pool: &str) -> Option<i64> {
        self.spec.floating_ip_quota.get(pool).copied()
    }

    /// Current usage of `pool`, 0 when the controller has not recorded any
    pub fn used_for(&self, pool: &str) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.floating_ips.get(pool))
            .map_or(0, |info| info.used)
    }
}
