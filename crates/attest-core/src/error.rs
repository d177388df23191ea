//! Error types for the attestation core

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core domain logic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A mandatory request field was missing or blank
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A status string did not parse into a known status
    #[error("Unknown certificate status: {0}")]
    UnknownStatus(String),

    /// Metadata carried a value outside the allowed shapes
    #[error("Invalid metadata for key '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },
}
