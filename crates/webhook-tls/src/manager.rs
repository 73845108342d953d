//! Issuance and renewal of the serving identity.

use crate::csr::{CsrApprover, CsrRequester, ExchangePolicy, exchange};
use crate::error::{Result, TlsError};
use crate::identity::{CertificateRequest, ServiceIdentity, TlsIdentity};
use crate::secret::{LocalTlsFiles, SecretStore};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// What [`CertificateManager::ensure_fresh`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No secret existed; a first certificate was issued
    Issued,
    /// The stored certificate was close to expiry or unreadable and was replaced
    Renewed,
    /// The stored certificate is still good
    Unchanged,
    /// Renewal of an expiring but still valid certificate failed; it stays in use
    Retained,
}

/// Keeps a valid serving certificate in the secret store and on disk.
pub struct CertificateManager<C: ?Sized, S: ?Sized> {
    identity: ServiceIdentity,
    files: LocalTlsFiles,
    policy: ExchangePolicy,
    csr: Box<C>,
    secrets: Box<S>,
}

impl<C, S> CertificateManager<C, S>
where
    C: CsrRequester + CsrApprover + ?Sized,
    S: SecretStore + ?Sized,
{
    /// Creates a manager for `identity`.
    pub fn new(
        identity: ServiceIdentity,
        csr: Box<C>,
        secrets: Box<S>,
        files: LocalTlsFiles,
    ) -> Self {
        Self {
            identity,
            files,
            policy: ExchangePolicy::default(),
            csr,
            secrets,
        }
    }

    /// Overrides the read-back timing of signing request exchanges.
    pub fn with_policy(mut self, policy: ExchangePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The service this manager issues certificates for
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// The local key and certificate files
    pub fn files(&self) -> &LocalTlsFiles {
        &self.files
    }

    /// Ensures the stored certificate has at least `renewal_window_minutes` of validity left.
    ///
    /// Issues a certificate when none is stored and replaces one that is about to
    /// expire or cannot be read. The current key pair is written to the local
    /// files on every successful call; a failed write is logged and ignored.
    /// When issuance fails the stored secret is left untouched. A failed renewal
    /// of a certificate that is still readable is logged and reported as
    /// [`RefreshOutcome::Retained`]; an error means no usable certificate exists.
    pub async fn ensure_fresh(&self, renewal_window_minutes: i64) -> Result<RefreshOutcome> {
        let (outcome, identity) = match self.secrets.load().await? {
            None => {
                info!(
                    "TLS secret {} not found, requesting a new certificate",
                    self.identity.secret_name()
                );
                let identity = self.issue().await?;
                self.secrets.store(&identity).await?;
                info!(
                    not_after = %identity.not_after(),
                    "Stored new TLS secret {}", self.identity.secret_name()
                );
                (RefreshOutcome::Issued, identity)
            }
            Some(data) => match data.into_identity() {
                Ok(current) => {
                    let remaining = current.remaining_minutes(Utc::now());
                    if remaining >= renewal_window_minutes {
                        info!(
                            remaining_minutes = remaining,
                            "TLS certificate is valid until {}",
                            current.not_after()
                        );
                        (RefreshOutcome::Unchanged, current)
                    } else {
                        info!(
                            remaining_minutes = remaining,
                            window_minutes = renewal_window_minutes,
                            "TLS certificate is about to expire, renewing"
                        );
                        match self.replace().await {
                            Ok(renewed) => (RefreshOutcome::Renewed, renewed),
                            Err(e) => {
                                error!(
                                    "TLS renewal failed, keeping certificate valid until {}: {}",
                                    current.not_after(),
                                    e
                                );
                                (RefreshOutcome::Retained, current)
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Stored TLS certificate is unusable, renewing: {}", e);
                    (RefreshOutcome::Renewed, self.replace().await?)
                }
            },
        };

        if let Err(e) = self.files.write(&identity).await {
            error!(
                "Failed to write TLS files to {}: {}",
                self.files.cert_path().display(),
                e
            );
        }

        Ok(outcome)
    }

    /// Reads the expiry of the stored certificate.
    pub async fn expiration(&self) -> Result<DateTime<Utc>> {
        let data = self.secrets.load().await?.ok_or_else(|| {
            TlsError::CertificateUnavailable(format!(
                "secret {} not found",
                self.identity.secret_name()
            ))
        })?;
        let identity = data.into_identity()?;
        Ok(identity.not_after())
    }

    async fn replace(&self) -> Result<TlsIdentity> {
        let identity = self.issue().await?;
        self.secrets.delete().await?;
        self.secrets.store(&identity).await?;
        info!(
            not_after = %identity.not_after(),
            "Renewed TLS secret {}", self.identity.secret_name()
        );
        Ok(identity)
    }

    async fn issue(&self) -> Result<TlsIdentity> {
        let name = self.identity.csr_name();
        if self.csr.signing_request_exists(&name).await? {
            info!("Deleting stale signing request {}", name);
            self.csr.delete_signing_request(&name).await?;
        }

        let request = CertificateRequest::generate(&self.identity)?;
        let cert = exchange(self.csr.as_ref(), &name, request.csr_pem(), self.policy).await?;
        request.into_identity(cert)
    }
}
