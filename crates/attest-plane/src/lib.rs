//! Attestation Plane Server
//!
//! The plane is the certificate issuance service that:
//! - Drives certificates through their multi-step, partially-asynchronous
//!   lifecycle (pending → processing → completed/failed, with
//!   cancel/suspend on top of completed)
//! - Guarantees at most one active certificate per policy/vehicle/company
//!   business key
//! - Makes client retries idempotent through a persistent key ledger
//! - Isolates provider failures from local state and reconciles local
//!   status against the provider on demand
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check
//! - `POST /v1/certificates` - Create a certificate (supports the
//!   `Idempotency-Key` header)
//! - `POST /v1/certificates/bulk` - Bulk creation
//! - `GET /v1/certificates` - Search certificates
//! - `GET /v1/certificates/{id}` - Fetch one certificate
//! - `GET /v1/certificates/{id}/download` - Resolve a download link
//! - `GET /v1/certificates/reference/{reference}/status` - Status check
//!   with provider reconciliation
//! - `POST /v1/certificates/cancel` - Cancel completed certificates
//! - `POST /v1/certificates/suspend` - Suspend completed certificates

pub mod api;
pub mod audit;
pub mod error;
pub mod idempotency;
pub mod orchestrator;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use audit::{AuditAction, AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use error::{Result, ServiceError};
pub use orchestrator::{CertificateOrchestrator, OrchestratorConfig};
pub use storage::{CertificateStore, IdempotencyStore, MemoryStore};
#[cfg(feature = "postgres")]
pub use storage::PostgresStore;
