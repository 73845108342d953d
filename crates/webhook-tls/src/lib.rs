//! Self-managed TLS serving identity for admission webhooks
//!
//! The webhook obtains its serving certificate from the cluster itself: it
//! generates a key, submits a kubelet-serving certificate signing request,
//! approves it, stores the issued pair in a TLS secret and mirrors it to local
//! files for the HTTPS server. A background scheduler renews the certificate
//! ahead of expiry and bounces the server afterwards.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webhook_tls::{
//!     CertificateManager, KubeCsrClient, KubeSecretStore, LocalTlsFiles, RenewalScheduler,
//!     ServiceIdentity, ServingEndpoint,
//! };
//!
//! # async fn example(
//! #     client: kube::Client,
//! #     server: Arc<dyn ServingEndpoint>,
//! # ) -> webhook_tls::Result<()> {
//! let identity = ServiceIdentity::new("fip-webhook", "fip-system");
//! let manager = CertificateManager::new(
//!     identity.clone(),
//!     Box::new(KubeCsrClient::new(client.clone())),
//!     Box::new(KubeSecretStore::new(client, identity.namespace(), identity.secret_name())),
//!     LocalTlsFiles::in_dir("/tmp"),
//! );
//!
//! // Issue or renew before serving
//! manager.ensure_fresh(43_200).await?;
//!
//! let mut handle = RenewalScheduler::new(Arc::new(manager), server, 43_200).start();
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod csr;
pub mod error;
pub mod identity;
pub mod manager;
pub mod scheduler;
pub mod secret;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use csr::{
    CsrApprover, CsrRequester, ExchangePolicy, KubeCsrClient, SigningState, exchange,
};
pub use error::{Result, TlsError};
pub use identity::{CertificateRequest, ServiceIdentity, TlsIdentity, certificate_not_after};
pub use manager::{CertificateManager, RefreshOutcome};
pub use scheduler::{RenewalScheduler, SchedulerHandle, ServingEndpoint, renewal_delay_minutes};
pub use secret::{KubeSecretStore, LocalTlsFiles, SecretData, SecretStore};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCluster, MockFailure};
