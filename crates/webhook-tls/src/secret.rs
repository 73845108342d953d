//! Persistence of the serving identity.
//!
//! The identity lives in a `kubernetes.io/tls` secret and is mirrored to two
//! local files that the HTTPS server loads when it (re)starts.

use crate::error::{Result, TlsError};
use crate::identity::TlsIdentity;
use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Secret field holding the PKCS#8 private key
pub const TLS_KEY_FIELD: &str = "tls.key";

/// Secret field holding the leaf certificate
pub const TLS_CERT_FIELD: &str = "tls.crt";

/// Secret type for TLS key pairs
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Raw contents of the stored secret; fields may be missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretData {
    /// `tls.key` field
    pub key: Option<Vec<u8>>,
    /// `tls.crt` field
    pub cert: Option<Vec<u8>>,
}

impl std::fmt::Debug for SecretData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretData")
            .field("has_key", &self.key.is_some())
            .field("has_cert", &self.cert.is_some())
            .finish()
    }
}

impl SecretData {
    /// Captures a complete identity for storage.
    pub fn from_identity(identity: &TlsIdentity) -> Self {
        Self {
            key: Some(identity.key_pem().to_vec()),
            cert: Some(identity.cert_pem().to_vec()),
        }
    }

    /// Validates the stored fields and parses the certificate expiry.
    pub fn into_identity(self) -> Result<TlsIdentity> {
        let cert = self.cert.ok_or_else(|| {
            TlsError::CertificateUnavailable(format!("{TLS_CERT_FIELD} not found in secret"))
        })?;
        let key = self.key.ok_or_else(|| {
            TlsError::CertificateUnavailable(format!("{TLS_KEY_FIELD} not found in secret"))
        })?;
        TlsIdentity::from_pem(key, cert)
    }
}

/// Key/value store for the current identity
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Loads the stored identity, `None` if no secret exists
    async fn load(&self) -> Result<Option<SecretData>>;

    /// Creates the secret from `identity`
    async fn store(&self, identity: &TlsIdentity) -> Result<()>;

    /// Deletes the secret
    async fn delete(&self) -> Result<()>;
}

/// Secret store backed by a namespaced TLS secret.
#[derive(Clone)]
pub struct KubeSecretStore {
    api: Api<Secret>,
    name: String,
    namespace: String,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    /// Creates a store for secret `name` in `namespace`.
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn load(&self) -> Result<Option<SecretData>> {
        let Some(secret) = self.api.get_opt(&self.name).await? else {
            return Ok(None);
        };
        let mut data = secret.data.unwrap_or_default();
        Ok(Some(SecretData {
            key: data.remove(TLS_KEY_FIELD).map(|b| b.0),
            cert: data.remove(TLS_CERT_FIELD).map(|b| b.0),
        }))
    }

    async fn store(&self, identity: &TlsIdentity) -> Result<()> {
        let mut data = BTreeMap::new();
        data.insert(
            TLS_KEY_FIELD.to_string(),
            ByteString(identity.key_pem().to_vec()),
        );
        data.insert(
            TLS_CERT_FIELD.to_string(),
            ByteString(identity.cert_pem().to_vec()),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some(TLS_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        };

        self.api.create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.api.delete(&self.name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Local copies of the key and certificate read by the HTTPS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTlsFiles {
    key_path: PathBuf,
    cert_path: PathBuf,
}

impl LocalTlsFiles {
    /// Files named `tls.key` and `tls.crt` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            key_path: dir.join(TLS_KEY_FIELD),
            cert_path: dir.join(TLS_CERT_FIELD),
        }
    }

    /// Path of the private key file
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Path of the certificate file
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Writes the key (owner read/write only) and the certificate.
    pub async fn write(&self, identity: &TlsIdentity) -> Result<()> {
        write_with_mode(&self.key_path, identity.key_pem(), 0o600).await?;
        write_with_mode(&self.cert_path, identity.cert_pem(), 0o644).await
    }
}

/// Writes `contents` to a sibling temporary file created with `mode`, then
/// renames it over `path`. Readers see either the old or the new file.
async fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let tmp = temporary_path(path);
    match tokio::fs::remove_file(&tmp).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    // umask may have narrowed the creation mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}
