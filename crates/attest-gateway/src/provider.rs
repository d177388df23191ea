//! Provider Gateway
//!
//! Client for the external attestation-generation provider. Four
//! operations: submit an attestation order, query authoritative status,
//! request a status change (cancel/suspend), and fetch download links.
//! All of them run behind this gateway's own circuit breaker.

use async_trait::async_trait;
use tracing::debug;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{GatewayError, Result};
use crate::types::{
    AttestationOrder, DownloadLink, OperationCode, ProviderAttestationRequest,
    ProviderAttestationResponse, StatusCheckRequest, StatusCheckResponse, UpdateStatusRequest,
    UpdateStatusResponse,
};

/// Trait for provider operations
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Submit an attestation order
    ///
    /// A transport-level success can still carry `success: false`; the
    /// caller must inspect the provider's own flag.
    async fn create_attestation(&self, order: &AttestationOrder)
        -> Result<ProviderAttestationResponse>;

    /// Query the authoritative status of a previously submitted order
    async fn check_status(&self, request_reference: &str) -> Result<StatusCheckResponse>;

    /// Request cancellation or suspension of issued attestations
    async fn update_attestation_status(
        &self,
        certificate_numbers: &[String],
        operation: OperationCode,
    ) -> Result<UpdateStatusResponse>;

    /// Fetch download links for an issued attestation
    async fn fetch_download_links(&self, certificate_number: &str) -> Result<Vec<DownloadLink>>;

    /// Get a description of this gateway (for logging)
    fn description(&self) -> &str {
        "provider gateway"
    }
}

/// HTTP implementation backed by the provider's REST API
pub struct HttpProviderGateway {
    base_url: String,
    /// Our platform's identity towards the provider (`code_demandeur`)
    requester_code: String,
    http_client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpProviderGateway {
    /// Create a gateway for the given provider base URL and requester code
    pub fn new(
        base_url: impl Into<String>,
        requester_code: impl Into<String>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            requester_code: requester_code.into(),
            http_client: reqwest::Client::new(),
            breaker: CircuitBreaker::new("provider", breaker_config),
        }
    }

    /// The breaker guarding this gateway
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        endpoint: String,
        body: &B,
    ) -> Result<T> {
        let response = self.http_client.post(&endpoint).json(body).send().await?;

        if !response.status().is_success() {
            return Err(GatewayError::UnexpectedStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::MalformedResponse {
                endpoint,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn create_attestation(
        &self,
        order: &AttestationOrder,
    ) -> Result<ProviderAttestationResponse> {
        let endpoint = format!("{}/api/v1/attestations", self.base_url);
        let request = ProviderAttestationRequest {
            requester_code: self.requester_code.clone(),
            request_reference: order.request_reference.clone(),
            policy_number: order.policy.policy_number.clone(),
            company_code: order.policy.company_code.clone(),
            registration_number: order.policy.registration_number.clone(),
            insured_name: order.insured.name.clone(),
            agent_code: order.agent_code.clone(),
        };
        debug!(
            reference = %order.request_reference,
            policy = %request.policy_number,
            "Submitting attestation order to provider"
        );

        self.breaker.call(self.post_json(endpoint, &request)).await
    }

    async fn check_status(&self, request_reference: &str) -> Result<StatusCheckResponse> {
        let endpoint = format!("{}/api/v1/attestations/status", self.base_url);
        let request = StatusCheckRequest {
            requester_code: self.requester_code.clone(),
            request_reference: request_reference.to_string(),
        };
        debug!(reference = %request_reference, "Checking attestation status at provider");

        self.breaker.call(self.post_json(endpoint, &request)).await
    }

    async fn update_attestation_status(
        &self,
        certificate_numbers: &[String],
        operation: OperationCode,
    ) -> Result<UpdateStatusResponse> {
        let endpoint = format!("{}/api/v1/attestations/operations", self.base_url);
        let request = UpdateStatusRequest {
            requester_code: self.requester_code.clone(),
            certificate_numbers: certificate_numbers.to_vec(),
            operation_code: operation.wire_code().to_string(),
        };
        debug!(
            operation = %operation,
            count = certificate_numbers.len(),
            "Requesting attestation status update at provider"
        );

        self.breaker.call(self.post_json(endpoint, &request)).await
    }

    async fn fetch_download_links(&self, certificate_number: &str) -> Result<Vec<DownloadLink>> {
        let endpoint = format!(
            "{}/api/v1/attestations/{}/links",
            self.base_url, certificate_number
        );
        debug!(certificate = %certificate_number, "Fetching download links from provider");

        self.breaker
            .call(async {
                let response = self.http_client.get(&endpoint).send().await?;
                if !response.status().is_success() {
                    return Err(GatewayError::UnexpectedStatus {
                        endpoint: endpoint.clone(),
                        status: response.status().as_u16(),
                    });
                }
                response
                    .json::<Vec<DownloadLink>>()
                    .await
                    .map_err(|e| GatewayError::MalformedResponse {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })
            })
            .await
    }

    fn description(&self) -> &str {
        "HTTP provider gateway"
    }
}
