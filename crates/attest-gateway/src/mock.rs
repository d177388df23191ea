//! Mock Gateways
//!
//! For testing purposes - scriptable registry and provider doubles.
//! The plane crate's orchestrator tests drive these instead of the
//! network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::registry::RegistryGateway;
use crate::provider::ProviderGateway;
use crate::types::{
    AttestationOrder, DownloadLink, InsuredParty, OperationCode, Policy,
    ProviderAttestationResponse, StatusCheckResponse, UpdateStatusResponse,
};

/// In-memory registry double
///
/// Seed it with policies and insured parties; anything else resolves to
/// `None`. Set `unreachable` to simulate a registry outage.
#[derive(Default)]
pub struct MockRegistryGateway {
    policies: Mutex<HashMap<(String, String), Policy>>,
    insured: Mutex<HashMap<String, InsuredParty>>,
    unreachable: Mutex<Option<String>>,
}

impl MockRegistryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a policy, keyed by (policy_number, company_code)
    pub fn add_policy(&self, policy: Policy) {
        self.policies.lock().unwrap().insert(
            (policy.policy_number.clone(), policy.company_code.clone()),
            policy,
        );
    }

    /// Seed an insured party
    pub fn add_insured(&self, insured: InsuredParty) {
        self.insured
            .lock()
            .unwrap()
            .insert(insured.id.clone(), insured);
    }

    /// Make every call fail with an HTTP error
    pub fn set_unreachable(&self, message: impl Into<String>) {
        *self.unreachable.lock().unwrap() = Some(message.into());
    }

    fn check_reachable(&self) -> Result<()> {
        if let Some(message) = self.unreachable.lock().unwrap().clone() {
            return Err(GatewayError::Http(message));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryGateway for MockRegistryGateway {
    async fn fetch_policy(
        &self,
        policy_number: &str,
        company_code: &str,
    ) -> Result<Option<Policy>> {
        self.check_reachable()?;
        Ok(self
            .policies
            .lock()
            .unwrap()
            .get(&(policy_number.to_string(), company_code.to_string()))
            .cloned())
    }

    async fn fetch_insured(&self, insured_id: &str) -> Result<Option<InsuredParty>> {
        self.check_reachable()?;
        Ok(self.insured.lock().unwrap().get(insured_id).cloned())
    }

    fn description(&self) -> &str {
        "mock registry gateway"
    }
}

/// What the mock provider does with the next create call
enum CreateScript {
    /// Accept and complete with the given numbers
    Succeed {
        request_number: String,
        certificate_number: String,
    },
    /// Answer 200 but with the provider's own failure flag
    Reject(String),
    /// Fail at the transport level
    Unreachable(String),
}

/// Scriptable provider double with call counters
///
/// Defaults: creates succeed with generated numbers, status checks
/// answer code 0, updates succeed, download links are empty.
pub struct MockProviderGateway {
    create_script: Mutex<CreateScript>,
    status_code: Mutex<i64>,
    update_success: Mutex<bool>,
    download_links: Mutex<Vec<DownloadLink>>,
    unreachable: Mutex<Option<String>>,

    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl Default for MockProviderGateway {
    fn default() -> Self {
        Self {
            create_script: Mutex::new(CreateScript::Succeed {
                request_number: "REQ-MOCK-1".into(),
                certificate_number: "CERT-MOCK-1".into(),
            }),
            status_code: Mutex::new(0),
            update_success: Mutex::new(true),
            download_links: Mutex::new(Vec::new()),
            unreachable: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }
}

impl MockProviderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next creations to succeed with the given numbers
    pub fn succeed_with(
        &self,
        request_number: impl Into<String>,
        certificate_number: impl Into<String>,
    ) {
        *self.create_script.lock().unwrap() = CreateScript::Succeed {
            request_number: request_number.into(),
            certificate_number: certificate_number.into(),
        };
    }

    /// Script creations to be rejected by the provider itself
    pub fn reject_with(&self, message: impl Into<String>) {
        *self.create_script.lock().unwrap() = CreateScript::Reject(message.into());
    }

    /// Script creations to fail at the transport level
    pub fn fail_create_with(&self, message: impl Into<String>) {
        *self.create_script.lock().unwrap() = CreateScript::Unreachable(message.into());
    }

    /// Script the status code returned by check_status
    pub fn set_status_code(&self, code: i64) {
        *self.status_code.lock().unwrap() = code;
    }

    /// Script whether update_attestation_status succeeds
    pub fn set_update_success(&self, success: bool) {
        *self.update_success.lock().unwrap() = success;
    }

    /// Script the download links returned by fetch_download_links
    pub fn set_download_links(&self, links: Vec<DownloadLink>) {
        *self.download_links.lock().unwrap() = links;
    }

    /// Make every call fail with an HTTP error
    pub fn set_unreachable(&self, message: impl Into<String>) {
        *self.unreachable.lock().unwrap() = Some(message.into());
    }

    /// Undo `set_unreachable`
    pub fn set_reachable(&self) {
        *self.unreachable.lock().unwrap() = None;
    }

    fn check_reachable(&self) -> Result<()> {
        if let Some(message) = self.unreachable.lock().unwrap().clone() {
            return Err(GatewayError::Http(message));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderGateway for MockProviderGateway {
    async fn create_attestation(
        &self,
        order: &AttestationOrder,
    ) -> Result<ProviderAttestationResponse> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        match &*self.create_script.lock().unwrap() {
            CreateScript::Succeed {
                request_number,
                certificate_number,
            } => Ok(ProviderAttestationResponse {
                success: true,
                request_number: Some(request_number.clone()),
                certificate_number: Some(certificate_number.clone()),
                message: None,
                data: Some(serde_json::json!({
                    "reference": order.request_reference,
                })),
            }),
            CreateScript::Reject(message) => Ok(ProviderAttestationResponse {
                success: false,
                request_number: None,
                certificate_number: None,
                message: Some(message.clone()),
                data: None,
            }),
            CreateScript::Unreachable(message) => Err(GatewayError::Http(message.clone())),
        }
    }

    async fn check_status(&self, _request_reference: &str) -> Result<StatusCheckResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        Ok(StatusCheckResponse {
            status_code: *self.status_code.lock().unwrap(),
            message: None,
        })
    }

    async fn update_attestation_status(
        &self,
        _certificate_numbers: &[String],
        operation: OperationCode,
    ) -> Result<UpdateStatusResponse> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        if *self.update_success.lock().unwrap() {
            Ok(UpdateStatusResponse {
                success: true,
                message: None,
            })
        } else {
            Ok(UpdateStatusResponse {
                success: false,
                message: Some(format!("provider refused {operation}")),
            })
        }
    }

    async fn fetch_download_links(&self, _certificate_number: &str) -> Result<Vec<DownloadLink>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        Ok(self.download_links.lock().unwrap().clone())
    }

    fn description(&self) -> &str {
        "mock provider gateway"
    }
}
