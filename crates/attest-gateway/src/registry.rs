//! Registry Gateway
//!
//! Read-side client for the insurance registry: policies and insured
//! parties. The registry is the system of record; this gateway only
//! mirrors what creation needs, behind its own circuit breaker.

use async_trait::async_trait;
use tracing::debug;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{GatewayError, Result};
use crate::types::{InsuredParty, Policy};

/// Trait for registry lookups
///
/// `Ok(None)` means the registry answered and the record does not
/// exist; errors mean the registry could not be asked.
#[async_trait]
pub trait RegistryGateway: Send + Sync {
    /// Fetch a policy by its business key
    async fn fetch_policy(
        &self,
        policy_number: &str,
        company_code: &str,
    ) -> Result<Option<Policy>>;

    /// Fetch an insured party by registry id
    async fn fetch_insured(&self, insured_id: &str) -> Result<Option<InsuredParty>>;

    /// Get a description of this gateway (for logging)
    fn description(&self) -> &str {
        "registry gateway"
    }
}

/// HTTP implementation backed by the registry's REST API
pub struct HttpRegistryGateway {
    base_url: String,
    http_client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpRegistryGateway {
    /// Create a gateway for the given registry base URL
    pub fn new(base_url: impl Into<String>, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            base_url: base_url.into(),
            http_client: reqwest::Client::new(),
            breaker: CircuitBreaker::new("registry", breaker_config),
        }
    }

    /// The breaker guarding this gateway
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: String,
    ) -> Result<Option<T>> {
        let response = self.http_client.get(&endpoint).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GatewayError::UnexpectedStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::MalformedResponse {
                endpoint,
                reason: e.to_string(),
            })?;
        Ok(Some(body))
    }
}

#[async_trait]
impl RegistryGateway for HttpRegistryGateway {
    async fn fetch_policy(
        &self,
        policy_number: &str,
        company_code: &str,
    ) -> Result<Option<Policy>> {
        let endpoint = format!(
            "{}/api/v1/policies/{}?company_code={}",
            self.base_url, policy_number, company_code
        );
        debug!(endpoint = %endpoint, "Fetching policy from registry");

        self.breaker.call(self.get_optional(endpoint)).await
    }

    async fn fetch_insured(&self, insured_id: &str) -> Result<Option<InsuredParty>> {
        let endpoint = format!("{}/api/v1/insured/{}", self.base_url, insured_id);
        debug!(endpoint = %endpoint, "Fetching insured party from registry");

        self.breaker.call(self.get_optional(endpoint)).await
    }

    fn description(&self) -> &str {
        "HTTP registry gateway"
    }
}
