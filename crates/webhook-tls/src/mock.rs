//! In-memory cluster for unit testing
//!
//! [`MockCluster`] plays the signing request API, the cluster authority and the
//! secret store at once. Approved requests are signed by a throwaway CA so the
//! issued certificates parse like real ones.

use crate::csr::{CsrApprover, CsrRequester, SigningState};
use crate::error::{Result, TlsError};
use crate::identity::{CertificateRequest, ServiceIdentity, TlsIdentity};
use crate::secret::{SecretData, SecretStore};
use async_trait::async_trait;
use chrono::{Datelike, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFailure {
    /// Creating a signing request
    CreateCsr,
    /// Approving a signing request
    ApproveCsr,
    /// Deleting a signing request
    DeleteCsr,
    /// Reading the secret
    GetSecret,
    /// Creating the secret
    CreateSecret,
    /// Deleting the secret
    DeleteSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signing {
    Sign,
    Withhold,
    Deny(String),
}

#[derive(Debug, Default)]
struct MockCsr {
    request_pem: String,
    certificate: Option<Vec<u8>>,
}

#[derive(Debug)]
struct MockState {
    csrs: HashMap<String, MockCsr>,
    secret: Option<SecretData>,
    events: Vec<String>,
    approvals: Vec<String>,
    failures: HashSet<MockFailure>,
    signing: Signing,
    validity_days: i64,
}

/// Mock signing authority and secret store
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    ca_cert_pem: String,
    ca_key_pem: String,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// Create an empty cluster that signs every approved request for a year
    pub fn new() -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        params.not_after = rcgen::date_time_ymd(2099, 1, 1);

        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        Self {
            state: Arc::new(Mutex::new(MockState {
                csrs: HashMap::new(),
                secret: None,
                events: Vec::new(),
                approvals: Vec::new(),
                failures: HashSet::new(),
                signing: Signing::Sign,
                validity_days: 365,
            })),
            ca_cert_pem: cert.pem(),
            ca_key_pem: key_pair.serialize_pem(),
        }
    }

    /// Make `operation` fail until [`MockCluster::recover`] is called
    pub fn fail_on(&self, operation: MockFailure) {
        self.state.lock().unwrap().failures.insert(operation);
    }

    /// Clear all injected failures
    pub fn recover(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Approve requests but never sign them
    pub fn withhold_signing(&self) {
        self.state.lock().unwrap().signing = Signing::Withhold;
    }

    /// Deny every request with `reason`
    pub fn deny_signing(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().signing = Signing::Deny(reason.into());
    }

    /// Validity of certificates issued from now on; zero or less yields expired certificates
    pub fn set_validity_days(&self, days: i64) {
        self.state.lock().unwrap().validity_days = days;
    }

    /// Put `data` in the secret store (for test setup)
    pub fn seed_secret(&self, data: SecretData) {
        self.state.lock().unwrap().secret = Some(data);
    }

    /// Current secret contents
    pub fn secret(&self) -> Option<SecretData> {
        self.state.lock().unwrap().secret.clone()
    }

    /// Names of the signing requests currently present
    pub fn csr_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().csrs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the requests approved so far, in order
    pub fn approvals(&self) -> Vec<String> {
        self.state.lock().unwrap().approvals.clone()
    }

    /// Mutating operations performed so far, in order
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// Forget recorded events and approvals
    pub fn clear_events(&self) {
        let mut state = self.state.lock().unwrap();
        state.events.clear();
        state.approvals.clear();
    }

    /// Issue a complete identity for `name`/`namespace` without going through the API
    pub fn issue_identity(&self, name: &str, namespace: &str) -> TlsIdentity {
        let request = CertificateRequest::generate(&ServiceIdentity::new(name, namespace)).unwrap();
        let validity_days = self.state.lock().unwrap().validity_days;
        let cert = self.sign(request.csr_pem(), validity_days).unwrap();
        request.into_identity(cert).unwrap()
    }

    fn check(state: &MockState, operation: MockFailure) -> Result<()> {
        if state.failures.contains(&operation) {
            return Err(TlsError::Kube(kube::Error::Service(
                format!("injected {operation:?} failure").into(),
            )));
        }
        Ok(())
    }

    fn sign(&self, request_pem: &str, validity_days: i64) -> Result<Vec<u8>> {
        let mut csr_params = CertificateSigningRequestParams::from_pem(request_pem)
            .map_err(|e| TlsError::CertificateRequest(format!("failed to parse CSR: {e}")))?;

        let expiry = Utc::now() + Duration::days(validity_days);
        csr_params.params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        let month = u8::try_from(expiry.month())
            .map_err(|e| TlsError::CertificateRequest(format!("invalid expiry month: {e}")))?;
        let day = u8::try_from(expiry.day())
            .map_err(|e| TlsError::CertificateRequest(format!("invalid expiry day: {e}")))?;
        csr_params.params.not_after = rcgen::date_time_ymd(expiry.year(), month, day);

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| TlsError::KeyGeneration(format!("failed to load CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| TlsError::CertificateRequest(format!("failed to create issuer: {e}")))?;
        let cert = csr_params
            .signed_by(&issuer)
            .map_err(|e| TlsError::CertificateRequest(format!("failed to sign: {e}")))?;

        Ok(cert.pem().into_bytes())
    }
}

#[async_trait]
impl CsrRequester for MockCluster {
    async fn signing_request_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().csrs.contains_key(name))
    }

    async fn submit_signing_request(&self, name: &str, request_pem: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, MockFailure::CreateCsr)?;
        if state.csrs.contains_key(name) {
            return Err(TlsError::Kube(kube::Error::Service(
                format!("certificatesigningrequests \"{name}\" already exists").into(),
            )));
        }
        state.csrs.insert(
            name.to_string(),
            MockCsr {
                request_pem: request_pem.to_string(),
                certificate: None,
            },
        );
        state.events.push(format!("csr:create:{name}"));
        Ok(())
    }

    async fn signing_state(&self, name: &str) -> Result<SigningState> {
        let state = self.state.lock().unwrap();
        let Some(csr) = state.csrs.get(name) else {
            return Err(TlsError::NotIssued(format!("{name}: signing request disappeared")));
        };
        if let Signing::Deny(reason) = &state.signing {
            return Ok(SigningState::Rejected(format!("Denied ({reason})")));
        }
        Ok(csr
            .certificate
            .clone()
            .map_or(SigningState::Pending, SigningState::Issued))
    }

    async fn delete_signing_request(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, MockFailure::DeleteCsr)?;
        state.csrs.remove(name);
        state.events.push(format!("csr:delete:{name}"));
        Ok(())
    }
}

#[async_trait]
impl CsrApprover for MockCluster {
    async fn approve_signing_request(&self, name: &str) -> Result<()> {
        let (request_pem, signing, validity_days) = {
            let state = self.state.lock().unwrap();
            Self::check(&state, MockFailure::ApproveCsr)?;
            let csr = state.csrs.get(name).ok_or_else(|| {
                TlsError::Kube(kube::Error::Service(
                    format!("certificatesigningrequests \"{name}\" not found").into(),
                ))
            })?;
            (
                csr.request_pem.clone(),
                state.signing.clone(),
                state.validity_days,
            )
        };

        let certificate = match signing {
            Signing::Sign => Some(self.sign(&request_pem, validity_days)?),
            Signing::Withhold | Signing::Deny(_) => None,
        };

        let mut state = self.state.lock().unwrap();
        if let Some(csr) = state.csrs.get_mut(name) {
            csr.certificate = certificate;
        }
        state.approvals.push(name.to_string());
        state.events.push(format!("csr:approve:{name}"));
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MockCluster {
    async fn load(&self) -> Result<Option<SecretData>> {
        let state = self.state.lock().unwrap();
        Self::check(&state, MockFailure::GetSecret)?;
        Ok(state.secret.clone())
    }

    async fn store(&self, identity: &TlsIdentity) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, MockFailure::CreateSecret)?;
        if state.secret.is_some() {
            return Err(TlsError::Kube(kube::Error::Service(
                "secret already exists".into(),
            )));
        }
        state.secret = Some(SecretData::from_identity(identity));
        state.events.push("secret:create".to_string());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, MockFailure::DeleteSecret)?;
        state.secret = None;
        state.events.push("secret:delete".to_string());
        Ok(())
    }
}
