//! Error types for the external gateways

use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur when talking to the registry or the provider
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Circuit breaker is open; the call was not attempted
    #[error("Circuit breaker '{0}' is open, call not attempted")]
    CircuitOpen(String),

    /// The call exceeded the breaker's hard timeout
    #[error("Call to '{gateway}' timed out after {timeout:?}")]
    Timeout { gateway: String, timeout: Duration },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote answered with a non-success HTTP status
    #[error("Unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    /// The provider processed the request and rejected it
    #[error("Provider rejected the request: {0}")]
    Provider(String),

    /// The remote answered with a body we could not interpret
    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}
