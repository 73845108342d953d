//! Webhook-specific error types.

use kube::Error as KubeError;
use thiserror::Error;
use webhook_tls::TlsError;

/// Errors that can stop the webhook process.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Serving identity could not be issued, stored or read
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    KubeConfig(String),

    /// HTTPS server failed
    #[error("Server error: {0}")]
    Server(String),

    /// ValidatingWebhookConfiguration could not be ensured
    #[error("Webhook registration failed: {0}")]
    Registration(String),

    /// The renewal scheduler stopped unexpectedly
    #[error("Renewal scheduler failed: {0}")]
    Scheduler(String),
}

/// Errors returned by the resource lookups of the validation engine.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// The API server did not answer in time
    #[error("lookup of {0} timed out")]
    Timeout(String),
}
