//! Audit sink
//!
//! Immutable action records emitted by the orchestrator. The sink is
//! fire-and-forget from the orchestrator's perspective: recording never
//! fails the business operation that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use attest_core::{CertificateStatus, Metadata};

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    StatusChanged,
    Cancelled,
    Suspended,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Created => write!(f, "created"),
            AuditAction::StatusChanged => write!(f, "status_changed"),
            AuditAction::Cancelled => write!(f, "cancelled"),
            AuditAction::Suspended => write!(f, "suspended"),
        }
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub certificate_id: Uuid,
    pub action: AuditAction,
    pub actor: Option<String>,
    pub old_status: Option<CertificateStatus>,
    pub new_status: Option<CertificateStatus>,
    #[serde(default)]
    pub detail: Metadata,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record stamped now
    pub fn new(certificate_id: Uuid, action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            certificate_id,
            action,
            actor: None,
            old_status: None,
            new_status: None,
            detail: Metadata::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_transition(mut self, old: CertificateStatus, new: CertificateStatus) -> Self {
        self.old_status = Some(old);
        self.new_status = Some(new);
        self
    }

    pub fn with_detail(mut self, detail: Metadata) -> Self {
        self.detail = detail;
        self
    }
}

/// Receiver of audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an entry; must not fail the caller
    async fn record(&self, record: AuditRecord);
}

/// Sink that emits records as structured log lines
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        info!(
            audit_id = %record.id,
            certificate_id = %record.certificate_id,
            action = %record.action,
            actor = ?record.actor,
            old_status = ?record.old_status,
            new_status = ?record.new_status,
            "Audit record"
        );
    }
}

/// Sink that keeps records in memory, for tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_accumulates() {
        let sink = MemoryAuditSink::new();
        let certificate_id = Uuid::new_v4();

        sink.record(AuditRecord::new(certificate_id, AuditAction::Created).with_actor("U1"))
            .await;
        sink.record(
            AuditRecord::new(certificate_id, AuditAction::StatusChanged).with_transition(
                CertificateStatus::Completed,
                CertificateStatus::Cancelled,
            ),
        )
        .await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, AuditAction::Created);
        assert_eq!(records[0].actor.as_deref(), Some("U1"));
        assert_eq!(records[1].new_status, Some(CertificateStatus::Cancelled));
    }
}
