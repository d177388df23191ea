//! API module for the attestation plane server

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub service: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        service: "attest-plane".into(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration for browser-based clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Certificate endpoints
        .route("/v1/certificates", post(handlers::create_certificate))
        .route("/v1/certificates", get(handlers::search_certificates))
        .route("/v1/certificates/bulk", post(handlers::bulk_certificates))
        .route("/v1/certificates/{id}", get(handlers::get_certificate))
        .route(
            "/v1/certificates/{id}/download",
            get(handlers::download_certificate),
        )
        .route(
            "/v1/certificates/reference/{reference}/status",
            get(handlers::check_status),
        )
        .route("/v1/certificates/cancel", post(handlers::cancel_certificates))
        .route(
            "/v1/certificates/suspend",
            post(handlers::suspend_certificates),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
