//! Read access to pools and project quotas.

use crate::error::LookupError;
use async_trait::async_trait;
use crds::{FloatingIPPool, FloatingIPProjectQuota};
use kube::{Api, Client};
use std::time::Duration;

/// Looks up a FloatingIPPool by name
#[async_trait]
pub trait PoolLookup: Send + Sync {
    /// Returns the pool, `None` if it does not exist
    async fn floating_ip_pool(&self, name: &str) -> Result<Option<FloatingIPPool>, LookupError>;
}

/// Looks up the quota object of a project
#[async_trait]
pub trait QuotaLookup: Send + Sync {
    /// Returns the project's quota, `None` if it does not exist
    async fn project_quota(
        &self,
        project: &str,
    ) -> Result<Option<FloatingIPProjectQuota>, LookupError>;
}

/// Lookups against the cluster API, bounded by a per-call timeout.
#[derive(Clone)]
pub struct KubeLookup {
    pools: Api<FloatingIPPool>,
    quotas: Api<FloatingIPProjectQuota>,
    timeout: Duration,
}

impl std::fmt::Debug for KubeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeLookup")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeLookup {
    /// Creates lookups for the cluster-scoped pool and quota resources.
    pub fn new(client: Client) -> Self {
        Self {
            pools: Api::all(client.clone()),
            quotas: Api::all(client),
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl PoolLookup for KubeLookup {
    async fn floating_ip_pool(&self, name: &str) -> Result<Option<FloatingIPPool>, LookupError> {
        tokio::time::timeout(self.timeout, self.pools.get_opt(name))
            .await
            .map_err(|_| LookupError::Timeout(format!("floatingippool {name}")))?
            .map_err(LookupError::from)
    }
}

#[async_trait]
impl QuotaLookup for KubeLookup {
    async fn project_quota(
        &self,
        project: &str,
    ) -> Result<Option<FloatingIPProjectQuota>, LookupError> {
        tokio::time::timeout(self.timeout, self.quotas.get_opt(project))
            .await
            .map_err(|_| LookupError::Timeout(format!("floatingipprojectquota {project}")))?
            .map_err(LookupError::from)
    }
}
