//! Storage abstraction for the attestation plane
//!
//! Trait-based so the orchestrator runs against the in-memory backend
//! (default, single-instance) or PostgreSQL (persistent, multi-instance).
//!
//! The stores are where the two check-then-act races of this domain are
//! closed: the one-active-certificate-per-business-key invariant and the
//! first-writer-wins idempotency key insert are both enforced inside a
//! single storage-level critical section (write lock in memory, unique
//! constraints in PostgreSQL), never by application-level read-then-decide.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use uuid::Uuid;

use attest_core::{Certificate, CertificateStatus, Metadata};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The active-business-key unique constraint rejected an insert
    #[error("Active certificate already exists: {id} ({status})")]
    ActiveConflict {
        id: Uuid,
        status: CertificateStatus,
    },

    /// A primary-key insert lost a race (idempotency ledger)
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// A status write outside the lifecycle table was rejected
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: CertificateStatus,
        to: CertificateStatus,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Input for creating a pending certificate
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub reference_number: String,
    pub policy_id: String,
    pub insured_id: String,
    pub policy_number: String,
    pub registration_number: String,
    pub company_code: String,
    pub agent_code: Option<String>,
    pub created_by: String,
    pub idempotency_key: Option<String>,
    pub metadata: Metadata,
}

/// Field changes applied in one read-modify-write step
///
/// `merge_metadata` merges into the existing bag; every other `Some`
/// overwrites its column. `reconcile` marks a status write coming from
/// provider reconciliation, which is the only writer allowed outside
/// the lifecycle table.
#[derive(Debug, Clone, Default)]
pub struct CertificateUpdate {
    pub status: Option<CertificateStatus>,
    pub merge_metadata: Option<Metadata>,
    pub provider_request_number: Option<String>,
    pub certificate_number: Option<String>,
    pub download_url: Option<String>,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub reconcile: bool,
}

impl CertificateUpdate {
    /// A plain status transition
    pub fn status(status: CertificateStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Search filter for certificate listings
#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub status: Option<CertificateStatus>,
    pub policy_number: Option<String>,
    pub company_code: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Default page size for searches
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Certificate persistence
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    /// Atomically check the active-business-key invariant and insert a
    /// pending certificate
    ///
    /// Returns `ActiveConflict` when another certificate with status in
    /// {pending, processing, completed} holds the same
    /// (policy_number, registration_number, company_code) triple.
    async fn insert_pending(&self, new: NewCertificate) -> Result<Certificate, StorageError>;

    /// Fetch a certificate by id
    async fn get(&self, id: Uuid) -> Result<Option<Certificate>, StorageError>;

    /// Fetch a certificate by reference number
    async fn get_by_reference(&self, reference: &str) -> Result<Option<Certificate>, StorageError>;

    /// All certificates matching a business-key triple, any status
    async fn find_by_business_key(
        &self,
        policy_number: &str,
        registration_number: &str,
        company_code: &str,
    ) -> Result<Vec<Certificate>, StorageError>;

    /// Apply an update; enforces the lifecycle table unless the update
    /// is marked as reconciliation. Bumps `updated_at`.
    async fn update(&self, id: Uuid, update: CertificateUpdate)
        -> Result<Certificate, StorageError>;

    /// Filtered listing, newest first
    async fn search(&self, filter: CertificateFilter) -> Result<Vec<Certificate>, StorageError>;
}

/// Lifecycle state of an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "pending"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One ledger entry: a key permanently bound to the fingerprint of the
/// request it was first used with
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response_body: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Idempotency ledger persistence
#[async_trait]
pub trait IdempotencyStore: Send + Sync + Debug {
    /// Insert a fresh pending record; `AlreadyExists` if the key is
    /// already present (first writer wins)
    async fn create_pending(
        &self,
        key: &str,
        request_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Fetch a record by key
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StorageError>;

    /// Mark a record completed with its cached response
    async fn complete(
        &self,
        key: &str,
        response_body: serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Mark a record failed
    async fn fail(&self, key: &str) -> Result<(), StorageError>;

    /// Atomically reset a failed record to pending for a retry; returns
    /// false when the record was not in the failed state (a concurrent
    /// retry won the reset)
    async fn reset_for_retry(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete a record outright (used when an expired record is replaced)
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete all expired records, returning the count removed; safe to
    /// run repeatedly and concurrently
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}
