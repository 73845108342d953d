//! Serving identity: naming, key/CSR generation and certificate inspection.
//!
//! The webhook presents itself as a node-serving identity so that the
//! cluster's kubelet-serving signer accepts its request:
//!
//! - Subject: `CN=system:node:<name>.<namespace>.svc, O=system:nodes`
//! - Key: 2048-bit RSA, request signed with SHA-256
//! - SANs: `<name>`, `<name>.<namespace>`, `<name>.<namespace>.svc`,
//!   `<name>.<namespace>.svc.cluster.local`

use crate::error::{Result, TlsError};
use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, PKCS_RSA_SHA256, RsaKeySize,
};
use x509_parser::pem::parse_x509_pem;

/// Organization required by the kubelet-serving signer
pub const NODE_ORGANIZATION: &str = "system:nodes";

/// Name and namespace of the webhook service, and every name derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    namespace: String,
}

impl ServiceIdentity {
    /// Creates the identity for service `name` in `namespace`.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Service short name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deterministic name of the cluster-scoped signing request
    pub fn csr_name(&self) -> String {
        format!("{}.{}.svc", self.name, self.namespace)
    }

    /// Name of the TLS secret holding the current identity
    pub fn secret_name(&self) -> String {
        format!("{}-tls", self.name)
    }

    /// Subject common name
    pub fn common_name(&self) -> String {
        format!("system:node:{}.{}.svc", self.name, self.namespace)
    }

    /// DNS subject alternative names
    pub fn dns_names(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            format!("{}.{}", self.name, self.namespace),
            self.csr_name(),
            format!("{}.{}.svc.cluster.local", self.name, self.namespace),
        ]
    }
}

/// A freshly generated private key and the PKCS#10 request for it.
#[derive(Debug)]
pub struct CertificateRequest {
    key_pem: String,
    csr_pem: String,
}

impl CertificateRequest {
    /// Generates a 2048-bit RSA key and a SHA-256 signed request for `identity`.
    pub fn generate(identity: &ServiceIdentity) -> Result<Self> {
        let key_pair = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
            .map_err(|e| TlsError::KeyGeneration(format!("failed to generate RSA key: {e}")))?;

        let mut params = CertificateParams::new(identity.dns_names()).map_err(|e| {
            TlsError::CertificateRequest(format!("invalid subject alternative names: {e}"))
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(identity.common_name()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(NODE_ORGANIZATION.to_string()),
        );
        params.distinguished_name = dn;

        let csr = params.serialize_request(&key_pair).map_err(|e| {
            TlsError::CertificateRequest(format!("failed to create certificate request: {e}"))
        })?;
        let csr_pem = csr.pem().map_err(|e| {
            TlsError::CertificateRequest(format!("failed to encode certificate request: {e}"))
        })?;

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem,
        })
    }

    /// PKCS#8 private key, PEM encoded
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// PKCS#10 request, PEM encoded
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// Pairs the private key with the certificate issued for this request.
    pub fn into_identity(self, cert_pem: Vec<u8>) -> Result<TlsIdentity> {
        TlsIdentity::from_pem(self.key_pem.into_bytes(), cert_pem)
    }
}

/// Private key, leaf certificate and its expiry.
#[derive(Clone)]
pub struct TlsIdentity {
    key_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl TlsIdentity {
    /// Builds an identity from PEM data, rejecting empty keys and unreadable certificates.
    pub fn from_pem(key_pem: Vec<u8>, cert_pem: Vec<u8>) -> Result<Self> {
        if key_pem.is_empty() {
            return Err(TlsError::CertificateUnavailable(
                "private key is empty".to_string(),
            ));
        }
        let not_after = certificate_not_after(&cert_pem)?;
        Ok(Self {
            key_pem,
            cert_pem,
            not_after,
        })
    }

    /// PKCS#8 private key, PEM encoded
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// Leaf certificate, PEM encoded
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Expiry of the leaf certificate
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whole minutes of validity left at `now` (negative once expired)
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_minutes()
    }
}

/// Reads the not-after timestamp of the first certificate in `cert_pem`.
pub fn certificate_not_after(cert_pem: &[u8]) -> Result<DateTime<Utc>> {
    if cert_pem.is_empty() {
        return Err(TlsError::CertificateUnavailable(
            "certificate is empty".to_string(),
        ));
    }

    let (_, pem) = parse_x509_pem(cert_pem).map_err(|e| {
        TlsError::CertificateUnavailable(format!("cannot decode TLS PEM data: {e}"))
    })?;
    if pem.label != "CERTIFICATE" {
        return Err(TlsError::CertificateUnavailable(format!(
            "unexpected PEM block {}",
            pem.label
        )));
    }

    let cert = pem.parse_x509().map_err(|e| {
        TlsError::CertificateUnavailable(format!("cannot parse TLS PEM data: {e}"))
    })?;
    let timestamp = cert.validity().not_after.timestamp();

    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        TlsError::CertificateUnavailable(format!("not-after {timestamp} is out of range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("fip-webhook", "fip-system")
    }

    #[test]
    fn test_derived_names() {
        let id = identity();
        assert_eq!(id.csr_name(), "fip-webhook.fip-system.svc");
        assert_eq!(id.secret_name(), "fip-webhook-tls");
        assert_eq!(id.common_name(), "system:node:fip-webhook.fip-system.svc");
        assert_eq!(
            id.dns_names(),
            vec![
                "fip-webhook",
                "fip-webhook.fip-system",
                "fip-webhook.fip-system.svc",
                "fip-webhook.fip-system.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_generate_request() {
        let request = CertificateRequest::generate(&identity()).unwrap();

        assert!(request.key_pem().contains("BEGIN PRIVATE KEY"));
        assert!(request.csr_pem().contains("BEGIN CERTIFICATE REQUEST"));

        let (_, pem) = parse_x509_pem(request.csr_pem().as_bytes()).unwrap();
        assert_eq!(pem.label, "CERTIFICATE REQUEST");
    }

    #[test]
    fn test_not_after_rejects_bad_input() {
        assert!(matches!(
            certificate_not_after(b""),
            Err(TlsError::CertificateUnavailable(_))
        ));
        assert!(matches!(
            certificate_not_after(b"not a pem"),
            Err(TlsError::CertificateUnavailable(_))
        ));

        let request = CertificateRequest::generate(&identity()).unwrap();
        assert!(matches!(
            certificate_not_after(request.csr_pem().as_bytes()),
            Err(TlsError::CertificateUnavailable(_))
        ));
    }

    #[test]
    fn test_not_after_of_self_signed() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2090, 6, 1);
        let cert = params.self_signed(&key).unwrap();

        let not_after = certificate_not_after(cert.pem().as_bytes()).unwrap();
        assert_eq!(not_after.to_rfc3339(), "2090-06-01T00:00:00+00:00");
    }

    #[test]
    fn test_identity_requires_key() {
        assert!(matches!(
            TlsIdentity::from_pem(Vec::new(), b"-----BEGIN CERTIFICATE-----".to_vec()),
            Err(TlsError::CertificateUnavailable(_))
        ));
    }
}
