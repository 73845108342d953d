//! Certificate signing request exchange with the cluster authority.
//!
//! The webhook acts as both requester and approver of its own request:
//! [`CsrRequester`] submits, reads back and deletes requests, [`CsrApprover`]
//! records the approval. [`exchange`] drives one complete round trip.

use crate::error::{Result, TlsError};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::ByteString;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signer that issues serving certificates trusted by the API server
pub const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

/// Key usages requested for the serving certificate
pub const SERVING_USAGES: [&str; 3] = ["digital signature", "key encipherment", "server auth"];

/// Reason recorded on the approval condition
pub const APPROVAL_REASON: &str = "Approved by TLS Service";

/// Message recorded on the approval condition
pub const APPROVAL_MESSAGE: &str = "KubeTLS Approved";

/// Observed signing state of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningState {
    /// Not signed yet
    Pending,
    /// Signed; PEM encoded certificate
    Issued(Vec<u8>),
    /// Denied or failed, with the reason reported by the authority
    Rejected(String),
}

/// Requester side of the signing request flow
#[async_trait]
pub trait CsrRequester: Send + Sync {
    /// Returns true if a request named `name` exists
    async fn signing_request_exists(&self, name: &str) -> Result<bool>;

    /// Submits `request_pem` as a kubelet-serving signing request named `name`
    async fn submit_signing_request(&self, name: &str, request_pem: &str) -> Result<()>;

    /// Reads back the signing state of `name`
    async fn signing_state(&self, name: &str) -> Result<SigningState>;

    /// Deletes the request named `name`
    async fn delete_signing_request(&self, name: &str) -> Result<()>;
}

/// Approver side of the signing request flow
#[async_trait]
pub trait CsrApprover: Send + Sync {
    /// Marks the request named `name` as approved
    async fn approve_signing_request(&self, name: &str) -> Result<()>;
}

/// Timing of the read-back after approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePolicy {
    /// Wait before each read-back of the signed certificate
    pub settle_delay: Duration,
    /// Number of read-backs before giving up
    pub poll_attempts: u32,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            poll_attempts: 5,
        }
    }
}

/// Submits, approves and waits for a signed certificate.
///
/// Any failure aborts the exchange; the caller must not store anything.
/// Once submitted, the request is deleted again whether or not a certificate
/// came back. A failed delete is logged and does not fail the exchange.
pub async fn exchange<C>(
    client: &C,
    name: &str,
    request_pem: &str,
    policy: ExchangePolicy,
) -> Result<Vec<u8>>
where
    C: CsrRequester + CsrApprover + ?Sized,
{
    client.submit_signing_request(name, request_pem).await?;
    info!("Created signing request {}", name);

    let signed = approve_and_read_back(client, name, policy).await;

    match client.delete_signing_request(name).await {
        Ok(()) => debug!("Deleted signing request {}", name),
        Err(e) => warn!("Failed to delete signing request {}: {}", name, e),
    }

    signed
}

async fn approve_and_read_back<C>(
    client: &C,
    name: &str,
    policy: ExchangePolicy,
) -> Result<Vec<u8>>
where
    C: CsrRequester + CsrApprover + ?Sized,
{
    client.approve_signing_request(name).await?;
    info!("Approved signing request {}", name);

    for attempt in 1..=policy.poll_attempts.max(1) {
        tokio::time::sleep(policy.settle_delay).await;

        match client.signing_state(name).await? {
            SigningState::Issued(cert) if !cert.is_empty() => return Ok(cert),
            SigningState::Rejected(reason) => {
                return Err(TlsError::NotIssued(format!("{name}: {reason}")));
            }
            _ => debug!(attempt, "Signing request {} not signed yet", name),
        }
    }

    Err(TlsError::NotIssued(name.to_string()))
}

/// Signing request client backed by the cluster's certificates API.
#[derive(Clone)]
pub struct KubeCsrClient {
    api: Api<CertificateSigningRequest>,
}

impl std::fmt::Debug for KubeCsrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCsrClient").finish_non_exhaustive()
    }
}

impl KubeCsrClient {
    /// Creates a client for the cluster-scoped signing request API.
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl CsrRequester for KubeCsrClient {
    async fn signing_request_exists(&self, name: &str) -> Result<bool> {
        Ok(self.api.get_opt(name).await?.is_some())
    }

    async fn submit_signing_request(&self, name: &str, request_pem: &str) -> Result<()> {
        let csr = CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                groups: Some(vec!["system:authenticated".to_string()]),
                request: ByteString(request_pem.as_bytes().to_vec()),
                signer_name: KUBELET_SERVING_SIGNER.to_string(),
                usages: Some(SERVING_USAGES.iter().map(ToString::to_string).collect()),
                ..Default::default()
            },
            status: None,
        };

        self.api.create(&PostParams::default(), &csr).await?;
        Ok(())
    }

    async fn signing_state(&self, name: &str) -> Result<SigningState> {
        let Some(csr) = self.api.get_opt(name).await? else {
            return Err(TlsError::NotIssued(format!("{name}: signing request disappeared")));
        };
        let Some(status) = csr.status else {
            return Ok(SigningState::Pending);
        };

        let rejection = status.conditions.iter().flatten().find(|c| {
            (c.type_ == "Denied" || c.type_ == "Failed") && c.status == "True"
        });
        if let Some(condition) = rejection {
            return Ok(SigningState::Rejected(format!(
                "{} ({})",
                condition.type_,
                condition.message.as_deref().unwrap_or("no message")
            )));
        }

        Ok(status
            .certificate
            .map_or(SigningState::Pending, |cert| SigningState::Issued(cert.0)))
    }

    async fn delete_signing_request(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl CsrApprover for KubeCsrClient {
    async fn approve_signing_request(&self, name: &str) -> Result<()> {
        let approval = serde_json::json!({
            "status": {
                "conditions": [{
                    "type": "Approved",
                    "status": "True",
                    "reason": APPROVAL_REASON,
                    "message": APPROVAL_MESSAGE,
                    "lastUpdateTime": Utc::now().to_rfc3339(),
                }]
            }
        });

        self.api
            .patch_subresource(
                "approval",
                name,
                &PatchParams::default(),
                &Patch::Merge(&approval),
            )
            .await?;
        Ok(())
    }
}
