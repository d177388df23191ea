//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::ServiceError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            ApiError::Service(err) => match err {
                ServiceError::Validation { message, field } => (
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    message.clone(),
                    field
                        .as_ref()
                        .map(|f| serde_json::json!({ "field": f })),
                ),
                ServiceError::DuplicateCertificate { id, status } => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_CERTIFICATE",
                    "An active certificate already exists for this policy and vehicle".into(),
                    Some(serde_json::json!({
                        "certificate_id": id,
                        "status": status,
                    })),
                ),
                ServiceError::NotFound(what) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Not found: {what}"),
                    None,
                ),
                ServiceError::ExternalApi(msg) => (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_API_ERROR",
                    msg.clone(),
                    None,
                ),
                ServiceError::IdempotencyKeyReuse => (
                    StatusCode::CONFLICT,
                    "IDEMPOTENCY_KEY_REUSE",
                    "Idempotency key already used with a different request".into(),
                    None,
                ),
                ServiceError::IdempotencyInFlight => (
                    StatusCode::CONFLICT,
                    "REQUEST_IN_FLIGHT",
                    "A request with this idempotency key is already in progress".into(),
                    None,
                ),
                ServiceError::Storage(msg) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    msg.clone(),
                    None,
                ),
                ServiceError::Internal(msg) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    msg.clone(),
                    None,
                ),
            },
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_conflict_errors_are_distinguishable() {
        let duplicate: ApiError = ServiceError::DuplicateCertificate {
            id: uuid::Uuid::new_v4(),
            status: attest_core::CertificateStatus::Pending,
        }
        .into();
        let in_flight: ApiError = ServiceError::IdempotencyInFlight.into();

        // both are 409 but carry distinct codes so clients can tell
        // "already running" apart from "duplicate certificate"
        assert_eq!(duplicate.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(in_flight.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_external_api_maps_to_bad_gateway() {
        let err: ApiError = ServiceError::ExternalApi("circuit open".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
