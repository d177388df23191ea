//! # Attest Gateway
//!
//! External collaborators of the attestation platform:
//!
//! - **Registry Gateway**: fetches policy and insured-party data from
//!   the insurance registry (system of record)
//! - **Provider Gateway**: submits attestation requests to the external
//!   certificate-generation provider, queries authoritative status,
//!   requests cancellation/suspension, and fetches download links
//!
//! Every outbound call is wrapped by a circuit breaker owned by the
//! gateway instance it protects: a hard per-call timeout, fail-fast
//! while open, and a half-open probe after the reset timeout. Breakers
//! are never shared across gateways.
//!
//! Mock implementations for tests live in [`mock`].

pub mod breaker;
pub mod error;
pub mod mock;
pub mod provider;
pub mod registry;
pub mod types;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{GatewayError, Result};
pub use provider::{HttpProviderGateway, ProviderGateway};
pub use registry::{HttpRegistryGateway, RegistryGateway};
pub use types::{
    AttestationOrder, DownloadLink, InsuredParty, OperationCode, Policy,
    ProviderAttestationRequest, ProviderAttestationResponse, StatusCheckRequest,
    StatusCheckResponse, UpdateStatusRequest, UpdateStatusResponse,
};
