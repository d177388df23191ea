//! Attestation Plane Server Binary
//!
//! Runs the certificate issuance HTTP server.

use std::env;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use attest_gateway::{CircuitBreakerConfig, HttpProviderGateway, HttpRegistryGateway};
use attest_plane::storage::{CertificateStore, IdempotencyStore, MemoryStore};
use attest_plane::{
    create_router, idempotency, AppState, CertificateOrchestrator, OrchestratorConfig,
    TracingAuditSink,
};

#[tokio::main]
async fn main() {
    // Initialize logging
    let log_level = env::var("ATTEST_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Configuration
    let port: u16 = env::var("ATTEST_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .expect("ATTEST_PORT must be a valid port number");

    let registry_url =
        env::var("ATTEST_REGISTRY_URL").unwrap_or_else(|_| "http://localhost:8081".into());
    let provider_url =
        env::var("ATTEST_PROVIDER_URL").unwrap_or_else(|_| "http://localhost:8082".into());
    let requester_code =
        env::var("ATTEST_REQUESTER_CODE").unwrap_or_else(|_| "ATTEST-PLANE".into());

    // Storage: PostgreSQL when configured and compiled in, otherwise
    // in-memory
    let (certificate_store, idempotency_store) = build_stores().await;

    // Gateways, each with its own circuit breaker
    let registry = Arc::new(HttpRegistryGateway::new(
        registry_url.clone(),
        CircuitBreakerConfig::default(),
    ));
    let provider = Arc::new(HttpProviderGateway::new(
        provider_url.clone(),
        requester_code.clone(),
        CircuitBreakerConfig::default(),
    ));

    let orchestrator = Arc::new(CertificateOrchestrator::new(
        Arc::clone(&certificate_store),
        registry,
        provider,
        Arc::new(TracingAuditSink::new()),
        OrchestratorConfig::default(),
    ));

    // Hourly sweep of expired idempotency keys
    let sweeper = Arc::clone(&idempotency_store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(err) = idempotency::sweep_expired(sweeper.as_ref()).await {
                warn!(error = %err, "Idempotency sweep failed");
            }
        }
    });

    info!(
        registry = %registry_url,
        provider = %provider_url,
        requester_code = %requester_code,
        port = port,
        "Starting attestation plane server"
    );

    // Create application state
    let state = Arc::new(AppState {
        orchestrator,
        idempotency: idempotency_store,
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Attestation plane listening");

    axum::serve(listener, app).await.expect("Server error");
}

#[cfg(feature = "postgres")]
async fn build_stores() -> (Arc<dyn CertificateStore>, Arc<dyn IdempotencyStore>) {
    if let Ok(database_url) = env::var("ATTEST_DATABASE_URL") {
        let store = Arc::new(
            attest_plane::PostgresStore::new(&database_url)
                .await
                .expect("Failed to connect to PostgreSQL"),
        );
        let certificates: Arc<dyn CertificateStore> = store.clone();
        let idempotency: Arc<dyn IdempotencyStore> = store;
        return (certificates, idempotency);
    }
    warn!("ATTEST_DATABASE_URL not set, falling back to in-memory storage");
    memory_stores()
}

#[cfg(not(feature = "postgres"))]
async fn build_stores() -> (Arc<dyn CertificateStore>, Arc<dyn IdempotencyStore>) {
    memory_stores()
}

fn memory_stores() -> (Arc<dyn CertificateStore>, Arc<dyn IdempotencyStore>) {
    let store = Arc::new(MemoryStore::new());
    let certificates: Arc<dyn CertificateStore> = store.clone();
    let idempotency: Arc<dyn IdempotencyStore> = store;
    (certificates, idempotency)
}
