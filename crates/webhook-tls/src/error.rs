//! TLS lifecycle errors

use thiserror::Error;

/// Errors that can occur while managing the webhook serving identity
#[derive(Debug, Error)]
pub enum TlsError {
    /// Kubernetes API error (secret or signing request operations)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// RSA key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or encoding the PKCS#10 request failed
    #[error("Certificate request generation failed: {0}")]
    CertificateRequest(String),

    /// The cluster authority did not issue a certificate for the request
    #[error("No certificate issued for signing request {0}")]
    NotIssued(String),

    /// No usable certificate is stored (missing secret, missing data, bad PEM)
    #[error("Certificate unavailable: {0}")]
    CertificateUnavailable(String),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The serving endpoint could not be stopped or started
    #[error("Serving endpoint error: {0}")]
    Endpoint(String),
}

/// Result type for TLS lifecycle operations
pub type Result<T> = std::result::Result<T, TlsError>;
