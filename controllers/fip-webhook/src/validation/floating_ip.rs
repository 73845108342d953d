//! FloatingIP admission checks.

use super::ValidationResult;
use super::address::{in_range, parse_ip, parse_subnet};
use super::lookup::{PoolLookup, QuotaLookup};
use crds::{FloatingIP, FloatingIPPool};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Validates FloatingIP requests against their pool and the project quota.
#[derive(Clone)]
pub struct FloatingIPValidator {
    pools: Arc<dyn PoolLookup>,
    quotas: Arc<dyn QuotaLookup>,
    quota_settle_delay: Duration,
}

impl std::fmt::Debug for FloatingIPValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloatingIPValidator")
            .field("quota_settle_delay", &self.quota_settle_delay)
            .finish_non_exhaustive()
    }
}

impl FloatingIPValidator {
    /// Creates a validator that waits two seconds before reading the quota.
    pub fn new(pools: Arc<dyn PoolLookup>, quotas: Arc<dyn QuotaLookup>) -> Self {
        Self {
            pools,
            quotas,
            quota_settle_delay: Duration::from_secs(2),
        }
    }

    /// Overrides the wait before the quota is read.
    ///
    /// The wait only narrows the window in which concurrent requests of one
    /// project read the same usage; it does not serialize them.
    pub fn with_quota_settle_delay(mut self, delay: Duration) -> Self {
        self.quota_settle_delay = delay;
        self
    }

    /// Decides whether `fip` may be created.
    pub async fn validate_floating_ip(&self, fip: &FloatingIP) -> ValidationResult {
        let pool_name = fip.spec.floating_ip_pool.as_str();

        let pool = match self.pools.floating_ip_pool(pool_name).await {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                return ValidationResult::denied(format!(
                    "the specified floatingippool {pool_name} does not exist"
                ));
            }
            Err(e) => {
                error!("Failed to get floatingippool {}: {}", pool_name, e);
                return ValidationResult::denied(format!(
                    "internal server error: failed to get floatingippool {pool_name}"
                ));
            }
        };

        let placement = match fip.spec.ip_addr.as_deref() {
            Some(requested) => check_requested_address(&pool, pool_name, requested),
            None if pool.available() <= 0 => Err(format!(
                "no available IPs in floatingippool {pool_name}"
            )),
            None => Ok(()),
        };
        if let Err(message) = placement {
            return ValidationResult::denied(message);
        }

        self.check_quota(fip, pool_name).await
    }

    async fn check_quota(&self, fip: &FloatingIP, pool_name: &str) -> ValidationResult {
        tokio::time::sleep(self.quota_settle_delay).await;

        let project = fip.project();
        let quota = if project.is_empty() {
            debug!(
                "FloatingIP {} has no project label",
                fip.name_any()
            );
            None
        } else {
            match self.quotas.project_quota(project).await {
                Ok(quota) => quota,
                Err(e) => {
                    error!("Failed to get floatingipprojectquota {}: {}", project, e);
                    return ValidationResult::denied(format!(
                        "internal server error: failed to get floatingipprojectquota for project {project}"
                    ));
                }
            }
        };
        let Some(quota) = quota else {
            return ValidationResult::denied(format!(
                "failed to get floatingipprojectquota for project {project}"
            ));
        };

        let Some(limit) = quota.quota_for(pool_name) else {
            return ValidationResult::denied(format!(
                "no quota defined for floatingippool {pool_name} in project {project}"
            ));
        };
        let used = quota.used_for(pool_name);
        if used >= limit {
            return ValidationResult::denied(format!(
                "quota exceeded for floatingippool {pool_name} in project {project}. Quota: {limit}, Used: {used}"
            ));
        }

        ValidationResult::allowed()
    }
}

/// Checks a specifically requested address against the pool.
fn check_requested_address(
    pool: &FloatingIPPool,
    pool_name: &str,
    requested: &str,
) -> Result<(), String> {
    let config = &pool.spec.ip_config;

    let ip = parse_ip(requested).ok_or_else(|| format!("invalid IP address format: {requested}"))?;

    let subnet = parse_subnet(&config.subnet).ok_or_else(|| {
        "internal server error: invalid subnet configuration in floatingippool".to_string()
    })?;
    if !subnet.contains(&ip) {
        return Err(format!(
            "requested IP {requested} is not in the subnet range {}",
            config.subnet
        ));
    }

    let start = parse_ip(&config.pool.start).ok_or_else(|| {
        format!("internal server error: invalid start ip configuration in floatingippool {pool_name}")
    })?;
    let end = parse_ip(&config.pool.end).ok_or_else(|| {
        format!("internal server error: invalid end ip configuration in floatingippool {pool_name}")
    })?;
    if !in_range(ip, start, end) {
        return Err(format!(
            "requested IP {requested} is not in the pool range [{}, {}]",
            config.pool.start, config.pool.end
        ));
    }

    if config.pool.exclude.iter().any(|excluded| excluded == requested) {
        return Err(format!("requested IP {requested} is in the exclude list"));
    }

    if pool.is_allocated(requested) {
        return Err(format!("requested IP {requested} is already allocated"));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LookupError;
    use async_trait::async_trait;
    use crds::{
        FipInfo, FloatingIPPoolSpec, FloatingIPPoolStatus, FloatingIPProjectQuota,
        FloatingIPProjectQuotaSpec, FloatingIPProjectQuotaStatus, FloatingIPSpec, IPConfig,
        PROJECT_LABEL, Pool,
    };
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    /// In-memory pools and quotas
    #[derive(Default)]
    pub(crate) struct StaticLookup {
        pools: HashMap<String, FloatingIPPool>,
        quotas: HashMap<String, FloatingIPProjectQuota>,
        failing: bool,
        quota_reads: Mutex<u32>,
    }

    impl StaticLookup {
        pub(crate) fn with_pool(mut self, pool: FloatingIPPool) -> Self {
            self.pools.insert(pool.name_any(), pool);
            self
        }

        pub(crate) fn with_quota(mut self, quota: FloatingIPProjectQuota) -> Self {
            self.quotas.insert(quota.name_any(), quota);
            self
        }

        pub(crate) fn failing(mut self) -> Self {
            self.failing = true;
            self
        }

        fn quota_reads(&self) -> u32 {
            *self.quota_reads.lock().unwrap()
        }

        fn error() -> LookupError {
            LookupError::Kube(kube::Error::Service("connection refused".into()))
        }
    }

    #[async_trait]
    impl PoolLookup for StaticLookup {
        async fn floating_ip_pool(
            &self,
            name: &str,
        ) -> Result<Option<FloatingIPPool>, LookupError> {
            if self.failing {
                return Err(Self::error());
            }
            Ok(self.pools.get(name).cloned())
        }
    }

    #[async_trait]
    impl QuotaLookup for StaticLookup {
        async fn project_quota(
            &self,
            project: &str,
        ) -> Result<Option<FloatingIPProjectQuota>, LookupError> {
            *self.quota_reads.lock().unwrap() += 1;
            if self.failing {
                return Err(Self::error());
            }
            Ok(self.quotas.get(project).cloned())
        }
    }

    pub(crate) fn pool(
        name: &str,
        subnet: &str,
        start: &str,
        end: &str,
        exclude: &[&str],
        allocated: &[&str],
        available: i64,
    ) -> FloatingIPPool {
        let mut pool = FloatingIPPool::new(
            name,
            FloatingIPPoolSpec {
                ip_config: IPConfig {
                    subnet: subnet.to_string(),
                    pool: Pool {
                        start: start.to_string(),
                        end: end.to_string(),
                        exclude: exclude.iter().map(ToString::to_string).collect(),
                    },
                },
            },
        );
        pool.status = Some(FloatingIPPoolStatus {
            allocated: allocated
                .iter()
                .map(|ip| ((*ip).to_string(), "default/other".to_string()))
                .collect(),
            available,
        });
        pool
    }

    pub(crate) fn quota(
        project: &str,
        pool: &str,
        limit: i64,
        used: Option<i64>,
    ) -> FloatingIPProjectQuota {
        let mut quota = FloatingIPProjectQuota::new(
            project,
            FloatingIPProjectQuotaSpec {
                floating_ip_quota: BTreeMap::from([(pool.to_string(), limit)]),
            },
        );
        quota.status = used.map(|used| FloatingIPProjectQuotaStatus {
            floating_ips: BTreeMap::from([(pool.to_string(), FipInfo { used })]),
        });
        quota
    }

    pub(crate) fn fip(pool: &str, ip: Option<&str>, project: Option<&str>) -> FloatingIP {
        let mut fip = FloatingIP::new(
            "web",
            FloatingIPSpec {
                floating_ip_pool: pool.to_string(),
                ip_addr: ip.map(ToString::to_string),
            },
        );
        fip.metadata.namespace = Some("default".to_string());
        if let Some(project) = project {
            fip.metadata.labels = Some(BTreeMap::from([(
                PROJECT_LABEL.to_string(),
                project.to_string(),
            )]));
        }
        fip
    }

    fn public_pool() -> FloatingIPPool {
        pool(
            "P",
            "10.0.0.0/24",
            "10.0.0.10",
            "10.0.0.20",
            &["10.0.0.11"],
            &["10.0.0.12"],
            5,
        )
    }

    fn validator(lookup: StaticLookup) -> (FloatingIPValidator, Arc<StaticLookup>) {
        let lookup = Arc::new(lookup);
        let validator = FloatingIPValidator::new(lookup.clone(), lookup.clone())
            .with_quota_settle_delay(Duration::ZERO);
        (validator, lookup)
    }

    async fn deny_message(lookup: StaticLookup, fip: &FloatingIP) -> String {
        let (validator, _) = validator(lookup);
        let result = validator.validate_floating_ip(fip).await;
        assert!(!result.allowed);
        result.message.unwrap()
    }

    fn with_quota(limit: i64, used: Option<i64>) -> StaticLookup {
        StaticLookup::default()
            .with_pool(public_pool())
            .with_quota(quota("J", "P", limit, used))
    }

    #[tokio::test]
    async fn test_allow_free_address_under_quota() {
        let (validator, _) = validator(with_quota(3, Some(2)));
        let result = validator
            .validate_floating_ip(&fip("P", Some("10.0.0.15"), Some("J")))
            .await;
        assert_eq!(result, ValidationResult::allowed());
    }

    #[tokio::test]
    async fn test_allow_any_address_without_usage() {
        let (validator, _) = validator(with_quota(1, None));
        let result = validator.validate_floating_ip(&fip("P", None, Some("J"))).await;
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_missing_pool() {
        let msg = deny_message(StaticLookup::default(), &fip("Q", None, Some("J"))).await;
        assert_eq!(msg, "the specified floatingippool Q does not exist");
    }

    #[tokio::test]
    async fn test_pool_lookup_error_is_internal() {
        let msg = deny_message(StaticLookup::default().failing(), &fip("P", None, Some("J"))).await;
        assert_eq!(msg, "internal server error: failed to get floatingippool P");
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let msg = deny_message(with_quota(3, None), &fip("P", Some("10.0.0.300"), Some("J"))).await;
        assert_eq!(msg, "invalid IP address format: 10.0.0.300");
    }

    #[tokio::test]
    async fn test_address_outside_subnet() {
        let msg = deny_message(with_quota(3, None), &fip("P", Some("10.0.1.5"), Some("J"))).await;
        assert_eq!(msg, "requested IP 10.0.1.5 is not in the subnet range 10.0.0.0/24");
    }

    #[tokio::test]
    async fn test_address_outside_range() {
        let msg = deny_message(with_quota(3, None), &fip("P", Some("10.0.0.5"), Some("J"))).await;
        assert_eq!(
            msg,
            "requested IP 10.0.0.5 is not in the pool range [10.0.0.10, 10.0.0.20]"
        );
    }

    #[tokio::test]
    async fn test_excluded_address() {
        let msg = deny_message(with_quota(3, None), &fip("P", Some("10.0.0.11"), Some("J"))).await;
        assert_eq!(msg, "requested IP 10.0.0.11 is in the exclude list");
    }

    // Exclude and allocation entries are matched as written, not by address value
    #[tokio::test]
    async fn test_mapped_spelling_bypasses_literal_lists() {
        let (validator, _) = validator(with_quota(3, None));
        for requested in ["::ffff:10.0.0.11", "::ffff:10.0.0.12"] {
            let result = validator
                .validate_floating_ip(&fip("P", Some(requested), Some("J")))
                .await;
            assert!(result.allowed, "{requested} should be allowed");
        }
    }

    #[tokio::test]
    async fn test_allocated_address() {
        let msg = deny_message(with_quota(3, None), &fip("P", Some("10.0.0.12"), Some("J"))).await;
        assert_eq!(msg, "requested IP 10.0.0.12 is already allocated");
    }

    #[tokio::test]
    async fn test_exhausted_pool() {
        let lookup = StaticLookup::default()
            .with_pool(pool("P", "10.0.0.0/24", "10.0.0.10", "10.0.0.20", &[], &[], 0))
            .with_quota(quota("J", "P", 3, None));
        let msg = deny_message(lookup, &fip("P", None, Some("J"))).await;
        assert_eq!(msg, "no available IPs in floatingippool P");
    }

    #[tokio::test]
    async fn test_broken_pool_configuration() {
        let lookup = StaticLookup::default()
            .with_pool(pool("P", "10.0.0.0", "10.0.0.10", "10.0.0.20", &[], &[], 1));
        let msg = deny_message(lookup, &fip("P", Some("10.0.0.15"), Some("J"))).await;
        assert_eq!(
            msg,
            "internal server error: invalid subnet configuration in floatingippool"
        );

        let lookup = StaticLookup::default()
            .with_pool(pool("P", "10.0.0.0/24", "start", "10.0.0.20", &[], &[], 1));
        let msg = deny_message(lookup, &fip("P", Some("10.0.0.15"), Some("J"))).await;
        assert_eq!(
            msg,
            "internal server error: invalid start ip configuration in floatingippool P"
        );

        let lookup = StaticLookup::default()
            .with_pool(pool("P", "10.0.0.0/24", "10.0.0.10", "end", &[], &[], 1));
        let msg = deny_message(lookup, &fip("P", Some("10.0.0.15"), Some("J"))).await;
        assert_eq!(
            msg,
            "internal server error: invalid end ip configuration in floatingippool P"
        );
    }

    #[tokio::test]
    async fn test_missing_quota_object() {
        let lookup = StaticLookup::default().with_pool(public_pool());
        let msg = deny_message(lookup, &fip("P", None, Some("J"))).await;
        assert_eq!(msg, "failed to get floatingipprojectquota for project J");
    }

    #[tokio::test]
    async fn test_missing_project_label() {
        let (validator, lookup) = validator(with_quota(3, None));
        let result = validator.validate_floating_ip(&fip("P", None, None)).await;
        assert_eq!(
            result.message.as_deref(),
            Some("failed to get floatingipprojectquota for project ")
        );
        assert_eq!(lookup.quota_reads(), 0);
    }

    #[tokio::test]
    async fn test_no_quota_for_pool() {
        let lookup = StaticLookup::default()
            .with_pool(public_pool())
            .with_quota(quota("J", "other", 3, None));
        let msg = deny_message(lookup, &fip("P", None, Some("J"))).await;
        assert_eq!(msg, "no quota defined for floatingippool P in project J");
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let msg = deny_message(with_quota(3, Some(3)), &fip("P", None, Some("J"))).await;
        assert_eq!(
            msg,
            "quota exceeded for floatingippool P in project J. Quota: 3, Used: 3"
        );
    }

    #[tokio::test]
    async fn test_first_failure_wins_before_quota() {
        let (validator, lookup) = validator(with_quota(3, Some(3)));
        let result = validator
            .validate_floating_ip(&fip("P", Some("10.0.0.11"), Some("J")))
            .await;
        assert_eq!(
            result.message.as_deref(),
            Some("requested IP 10.0.0.11 is in the exclude list")
        );
        assert_eq!(lookup.quota_reads(), 0);
    }

    #[tokio::test]
    async fn test_ipv6_pool() {
        let lookup = StaticLookup::default()
            .with_pool(pool(
                "P6",
                "2001:db8::/64",
                "2001:db8::10",
                "2001:db8::20",
                &[],
                &[],
                1,
            ))
            .with_quota(quota("J", "P6", 1, None));
        let (validator, _) = validator(lookup);

        assert!(
            validator
                .validate_floating_ip(&fip("P6", Some("2001:db8::15"), Some("J")))
                .await
                .allowed
        );
        assert_eq!(
            validator
                .validate_floating_ip(&fip("P6", Some("2001:db8::21"), Some("J")))
                .await
                .message
                .as_deref(),
            Some("requested IP 2001:db8::21 is not in the pool range [2001:db8::10, 2001:db8::20]")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_read_waits_for_settle_delay() {
        let lookup = Arc::new(with_quota(3, None));
        let validator = FloatingIPValidator::new(lookup.clone(), lookup.clone());
        let started = tokio::time::Instant::now();

        let result = validator.validate_floating_ip(&fip("P", None, Some("J"))).await;

        assert!(result.allowed);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(lookup.quota_reads(), 1);
    }
}
