//! Certificate API handlers
//!
//! Thin translation layer between HTTP and the orchestrator. The only
//! logic living here is idempotency-key plumbing for creation: clients
//! may supply a key through the `Idempotency-Key` header or the request
//! body; requests without a key bypass the ledger entirely.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use attest_core::{Certificate, CreateCertificateRequest};

use crate::api::error::ApiError;
use crate::idempotency;
use crate::orchestrator::{
    BatchOutcome, BatchStatusRequest, BulkCertificateRequest, BulkOutcome,
    CertificateOrchestrator, CreateCertificateOutcome, DownloadOutcome, StatusCheckOutcome,
};
use crate::storage::{CertificateFilter, IdempotencyStore};

/// Header carrying the client-supplied idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Application state shared across handlers
pub struct AppState {
    /// The certificate state-machine driver
    pub orchestrator: Arc<CertificateOrchestrator>,
    /// Ledger backing the idempotency wrapper
    pub idempotency: Arc<dyn IdempotencyStore>,
}

/// Create a certificate
///
/// POST /v1/certificates
///
/// Returns 202 with a `pending` outcome; the provider submission runs
/// detached and the client polls the status endpoint. With an
/// idempotency key, retries of the same body replay the first outcome.
pub async fn create_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut request): Json<CreateCertificateRequest>,
) -> Result<(StatusCode, Json<CreateCertificateOutcome>), ApiError> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.idempotency_key.clone());

    let outcome = match key {
        Some(key) => {
            request.idempotency_key = Some(key.clone());

            // fingerprint the body with the key cleared, so the same
            // logical request hashes identically however the key travels
            let mut canonical = request.clone();
            canonical.idempotency_key = None;
            let hash = idempotency::request_fingerprint(&canonical)?;

            let orchestrator = Arc::clone(&state.orchestrator);
            idempotency::run_idempotent(state.idempotency.as_ref(), &key, &hash, move || {
                async move { orchestrator.create_certificate(request).await }
            })
            .await?
        }
        None => state.orchestrator.create_certificate(request).await?,
    };

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// Fetch one certificate
///
/// GET /v1/certificates/{id}
pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Certificate>, ApiError> {
    Ok(Json(state.orchestrator.get_certificate(id).await?))
}

/// Check status with provider reconciliation
///
/// GET /v1/certificates/reference/{reference}/status
pub async fn check_status(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<StatusCheckOutcome>, ApiError> {
    Ok(Json(
        state.orchestrator.check_certificate_status(&reference).await?,
    ))
}

/// Cancel completed certificates
///
/// POST /v1/certificates/cancel
pub async fn cancel_certificates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchStatusRequest>,
) -> Result<Json<BatchOutcome>, ApiError> {
    Ok(Json(state.orchestrator.cancel_certificates(request).await?))
}

/// Suspend completed certificates
///
/// POST /v1/certificates/suspend
pub async fn suspend_certificates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchStatusRequest>,
) -> Result<Json<BatchOutcome>, ApiError> {
    Ok(Json(state.orchestrator.suspend_certificates(request).await?))
}

/// Resolve a download link
///
/// GET /v1/certificates/{id}/download
pub async fn download_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DownloadOutcome>, ApiError> {
    Ok(Json(state.orchestrator.download_certificate(id).await?))
}

/// Bulk creation
///
/// POST /v1/certificates/bulk
pub async fn bulk_certificates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkCertificateRequest>,
) -> Result<Json<BulkOutcome>, ApiError> {
    Ok(Json(
        state.orchestrator.process_bulk_certificates(request).await?,
    ))
}

/// Search query parameters
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub status: Option<String>,
    pub policy_number: Option<String>,
    pub company_code: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Search certificates
///
/// GET /v1/certificates
pub async fn search_certificates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Certificate>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: attest_core::CoreError| ApiError::BadRequest(e.to_string()))?;

    let filter = CertificateFilter {
        status,
        policy_number: query.policy_number,
        company_code: query.company_code,
        limit: query.limit,
        offset: query.offset,
    };

    Ok(Json(state.orchestrator.search_certificates(filter).await?))
}
