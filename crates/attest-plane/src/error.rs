//! Service-level error taxonomy
//!
//! Four families matter to callers: validation (never retried
//! automatically), not-found, external-API failures (retryable at the
//! caller's discretion), and idempotency conflicts (distinct from
//! validation so clients can tell "already running" from "invalid").

use thiserror::Error;
use uuid::Uuid;

use attest_core::{CertificateStatus, CoreError};
use attest_gateway::GatewayError;

use crate::storage::StorageError;

/// Result type alias using ServiceError
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by the orchestrator and the idempotency wrapper
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed input or business-rule violation
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// An active certificate already exists for the business key
    #[error("An active certificate already exists: {id} ({status})")]
    DuplicateCertificate {
        id: Uuid,
        status: CertificateStatus,
    },

    /// Referenced certificate/policy/insured does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry or provider failure, including circuit-open and timeout
    #[error("External API error: {0}")]
    ExternalApi(String),

    /// Idempotency key reused with a different request body
    #[error("Idempotency key already used with a different request")]
    IdempotencyKeyReuse,

    /// A request with the same idempotency key is still executing
    #[error("A request with this idempotency key is already in progress")]
    IdempotencyInFlight,

    /// Storage-layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Anything that should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Shorthand for a field-less validation error
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            field: None,
        }
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingField(field) => ServiceError::Validation {
                message: format!("Field '{field}' is required and must not be blank"),
                field: Some(field),
            },
            CoreError::UnknownStatus(s) => ServiceError::Validation {
                message: format!("Unknown certificate status: {s}"),
                field: Some("status".into()),
            },
            CoreError::InvalidMetadata { key, reason } => ServiceError::Validation {
                message: format!("Invalid metadata for key '{key}': {reason}"),
                field: Some("metadata".into()),
            },
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            StorageError::ActiveConflict { id, status } => {
                ServiceError::DuplicateCertificate { id, status }
            }
            StorageError::IllegalTransition { from, to } => ServiceError::Validation {
                message: format!("Illegal status transition: {from} -> {to}"),
                field: Some("status".into()),
            },
            StorageError::AlreadyExists(what) => {
                ServiceError::Internal(format!("Unexpected duplicate insert: {what}"))
            }
            StorageError::Database(msg)
            | StorageError::Serialization(msg)
            | StorageError::Connection(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalApi(err.to_string())
    }
}
