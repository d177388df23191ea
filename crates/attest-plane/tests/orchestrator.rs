//! Integration Tests for the Certificate Orchestrator
//!
//! These tests drive the orchestrator end to end against the in-memory
//! store and the mock gateways:
//! - happy path through the detached provider submission
//! - duplicate rejection while an active certificate holds the key
//! - failure isolation (provider rejection, provider unreachable)
//! - cancel/suspend preconditions and per-item batch isolation
//! - status-check reconciliation, one-directional for terminal states
//! - download-link caching
//! - bulk creation
//! - idempotent creation through the wrapper

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use attest_core::{
    Certificate, CertificateStatus, CreateCertificateRequest, DownloadLinkType, Metadata,
};
use attest_gateway::mock::{MockProviderGateway, MockRegistryGateway};
use attest_gateway::{DownloadLink, InsuredParty, Policy};
use attest_plane::idempotency::{request_fingerprint, run_idempotent};
use attest_plane::orchestrator::{BatchStatusRequest, BulkCertificateRequest};
use attest_plane::storage::{CertificateStore, NewCertificate};
use attest_plane::{
    CertificateOrchestrator, MemoryAuditSink, MemoryStore, OrchestratorConfig, ServiceError,
};
use attest_plane::audit::AuditAction;

// =============================================================================
// Test Harness
// =============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    registry: Arc<MockRegistryGateway>,
    provider: Arc<MockProviderGateway>,
    audit: Arc<MemoryAuditSink>,
    orchestrator: CertificateOrchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(MockRegistryGateway::new());
        let provider = Arc::new(MockProviderGateway::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let orchestrator = CertificateOrchestrator::new(
            store.clone(),
            registry.clone(),
            provider.clone(),
            audit.clone(),
            config,
        );

        let harness = Self {
            store,
            registry,
            provider,
            audit,
            orchestrator,
        };
        harness.seed_registry("POL1", "REG1", "C1", "ins-1");
        harness
    }

    fn seed_registry(&self, policy: &str, registration: &str, company: &str, insured_id: &str) {
        self.registry.add_policy(Policy {
            id: format!("pol-{policy}"),
            policy_number: policy.into(),
            company_code: company.into(),
            registration_number: registration.into(),
            insured_id: insured_id.into(),
            agent_code: None,
            valid_from: None,
            valid_until: None,
        });
        self.registry.add_insured(InsuredParty {
            id: insured_id.into(),
            name: "A. Holder".into(),
            email: None,
            phone: None,
            address: None,
        });
    }

    /// Poll until the detached submission settles the certificate
    async fn wait_for_settled(&self, id: uuid::Uuid) -> Certificate {
        for _ in 0..200 {
            let certificate = self.orchestrator.get_certificate(id).await.unwrap();
            if !matches!(
                certificate.status,
                CertificateStatus::Pending | CertificateStatus::Processing
            ) {
                return certificate;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("certificate {id} never settled");
    }

    /// Insert a certificate directly, bypassing the orchestrator, so it
    /// stays exactly in the given shape
    async fn insert_raw_pending(&self, policy: &str, registration: &str, company: &str) -> Certificate {
        self.store
            .insert_pending(NewCertificate {
                reference_number: format!("ATT-20260807000000-{policy}{registration}"),
                policy_id: format!("pol-{policy}"),
                insured_id: "ins-1".into(),
                policy_number: policy.into(),
                registration_number: registration.into(),
                company_code: company.into(),
                agent_code: None,
                created_by: "U1".into(),
                idempotency_key: None,
                metadata: Metadata::new(),
            })
            .await
            .unwrap()
    }
}

fn request(policy: &str, registration: &str, company: &str) -> CreateCertificateRequest {
    CreateCertificateRequest {
        policy_number: policy.into(),
        registration_number: registration.into(),
        company_code: company.into(),
        agent_code: None,
        requested_by: "U1".into(),
        idempotency_key: None,
        metadata: Metadata::new(),
    }
}

// =============================================================================
// Creation & Submission
// =============================================================================

#[tokio::test]
async fn test_happy_path_completes_in_background() {
    let harness = Harness::new();
    harness.provider.succeed_with("REQ-1", "CERT-1");

    let outcome = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();

    // the caller sees pending immediately
    assert_eq!(outcome.status, CertificateStatus::Pending);
    assert!(!outcome.reference_number.is_empty());

    let settled = harness.wait_for_settled(outcome.certificate_id).await;
    assert_eq!(settled.status, CertificateStatus::Completed);
    assert_eq!(settled.certificate_number.as_deref(), Some("CERT-1"));
    assert_eq!(settled.provider_request_number.as_deref(), Some("REQ-1"));

    let records = harness.audit.records();
    assert!(records
        .iter()
        .any(|r| r.action == AuditAction::Created && r.actor.as_deref() == Some("U1")));
}

#[tokio::test]
async fn test_blank_field_fails_before_any_io() {
    let harness = Harness::new();

    let mut blank = request("POL1", "REG1", "C1");
    blank.requested_by = "  ".into();
    let err = harness.orchestrator.create_certificate(blank).await.unwrap_err();

    assert!(matches!(err, ServiceError::Validation { .. }));
    // nothing was written and the registry was never asked
    assert!(harness
        .orchestrator
        .search_certificates(Default::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_missing_policy_writes_nothing() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .create_certificate(request("POL-UNKNOWN", "REG1", "C1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(harness
        .orchestrator
        .search_certificates(Default::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_duplicate_active_certificate_rejected() {
    let harness = Harness::new();

    let first = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap_err();

    match err {
        ServiceError::DuplicateCertificate { id, .. } => {
            assert_eq!(id, first.certificate_id);
        }
        other => panic!("expected DuplicateCertificate, got {other}"),
    }
}

#[tokio::test]
async fn test_failed_certificate_frees_the_business_key() {
    let harness = Harness::new();
    harness.provider.reject_with("policy expired");

    let first = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    let settled = harness.wait_for_settled(first.certificate_id).await;
    assert_eq!(settled.status, CertificateStatus::Failed);
    assert_eq!(settled.error_message.as_deref(), Some("policy expired"));

    // the key is free again once the first is failed
    harness.provider.succeed_with("REQ-2", "CERT-2");
    let second = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    let settled = harness.wait_for_settled(second.certificate_id).await;
    assert_eq!(settled.status, CertificateStatus::Completed);
}

#[tokio::test]
async fn test_provider_outage_marks_failed_without_crashing() {
    let harness = Harness::new();
    harness.provider.fail_create_with("connection refused");

    let outcome = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    assert_eq!(outcome.status, CertificateStatus::Pending);

    let settled = harness.wait_for_settled(outcome.certificate_id).await;
    assert_eq!(settled.status, CertificateStatus::Failed);
    assert!(settled.error_message.unwrap().contains("connection refused"));
}

// =============================================================================
// Cancel / Suspend
// =============================================================================

#[tokio::test]
async fn test_cancel_completed_certificate() {
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(outcome.certificate_id).await;

    let batch = harness
        .orchestrator
        .cancel_certificates(BatchStatusRequest {
            certificate_ids: vec![outcome.certificate_id],
            requested_by: Some("U2".into()),
        })
        .await
        .unwrap();

    assert_eq!(batch.succeeded, vec![outcome.certificate_id]);
    assert!(batch.failed.is_empty());
    assert_eq!(harness.provider.update_calls.load(Ordering::SeqCst), 1);

    let certificate = harness
        .orchestrator
        .get_certificate(outcome.certificate_id)
        .await
        .unwrap();
    assert_eq!(certificate.status, CertificateStatus::Cancelled);

    assert!(harness
        .audit
        .records()
        .iter()
        .any(|r| r.action == AuditAction::Cancelled && r.actor.as_deref() == Some("U2")));
}

#[tokio::test]
async fn test_cancel_pending_certificate_names_blocking_status() {
    let harness = Harness::new();
    let pending = harness.insert_raw_pending("POL9", "REG9", "C1").await;

    let batch = harness
        .orchestrator
        .cancel_certificates(BatchStatusRequest {
            certificate_ids: vec![pending.id],
            requested_by: None,
        })
        .await
        .unwrap();

    assert!(batch.succeeded.is_empty());
    assert_eq!(batch.failed.len(), 1);
    assert!(batch.failed[0].error.contains("pending"));

    // the certificate is untouched
    let unchanged = harness.orchestrator.get_certificate(pending.id).await.unwrap();
    assert_eq!(unchanged.status, CertificateStatus::Pending);
    assert_eq!(harness.provider.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_isolates_item_failures() {
    let harness = Harness::new();

    let completed = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(completed.certificate_id).await;
    let pending = harness.insert_raw_pending("POL9", "REG9", "C1").await;

    let batch = harness
        .orchestrator
        .suspend_certificates(BatchStatusRequest {
            certificate_ids: vec![pending.id, completed.certificate_id],
            requested_by: None,
        })
        .await
        .unwrap();

    // the pending item failed, the completed one still went through
    assert_eq!(batch.succeeded, vec![completed.certificate_id]);
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].certificate_id, pending.id);

    let suspended = harness
        .orchestrator
        .get_certificate(completed.certificate_id)
        .await
        .unwrap();
    assert_eq!(suspended.status, CertificateStatus::Suspended);
}

#[tokio::test]
async fn test_provider_refusal_fails_only_that_item() {
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(outcome.certificate_id).await;
    harness.provider.set_update_success(false);

    let batch = harness
        .orchestrator
        .cancel_certificates(BatchStatusRequest {
            certificate_ids: vec![outcome.certificate_id],
            requested_by: None,
        })
        .await
        .unwrap();

    assert_eq!(batch.failed.len(), 1);
    let unchanged = harness
        .orchestrator
        .get_certificate(outcome.certificate_id)
        .await
        .unwrap();
    assert_eq!(unchanged.status, CertificateStatus::Completed);
}

// =============================================================================
// Status Check & Reconciliation
// =============================================================================

#[tokio::test]
async fn test_status_check_before_submission_returns_local_status() {
    let harness = Harness::new();
    let pending = harness.insert_raw_pending("POL9", "REG9", "C1").await;

    let outcome = harness
        .orchestrator
        .check_certificate_status(&pending.reference_number)
        .await
        .unwrap();

    assert_eq!(outcome.status, CertificateStatus::Pending);
    assert!(outcome.note.unwrap().contains("not yet submitted"));
    assert_eq!(harness.provider.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_status_check_reconciles_differences() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;

    // the provider now says the attestation failed on its side
    harness.provider.set_status_code(-3);
    let outcome = harness
        .orchestrator
        .check_certificate_status(&created.reference_number)
        .await
        .unwrap();

    assert_eq!(outcome.status, CertificateStatus::Failed);
    assert_eq!(outcome.provider_status_code, Some(-3));
    assert!(outcome.note.unwrap().contains("reconciled"));

    let stored = harness
        .orchestrator
        .get_certificate(created.certificate_id)
        .await
        .unwrap();
    assert_eq!(stored.status, CertificateStatus::Failed);
}

#[tokio::test]
async fn test_status_check_agreement_changes_nothing() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;

    harness.provider.set_status_code(123);
    let outcome = harness
        .orchestrator
        .check_certificate_status(&created.reference_number)
        .await
        .unwrap();

    assert_eq!(outcome.status, CertificateStatus::Completed);
    assert!(outcome.note.is_none());
}

#[tokio::test]
async fn test_reconciliation_never_resurrects_cancelled() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;

    harness
        .orchestrator
        .cancel_certificates(BatchStatusRequest {
            certificate_ids: vec![created.certificate_id],
            requested_by: None,
        })
        .await
        .unwrap();

    // a lagging provider still reports completed
    harness.provider.set_status_code(0);
    let outcome = harness
        .orchestrator
        .check_certificate_status(&created.reference_number)
        .await
        .unwrap();

    assert_eq!(outcome.status, CertificateStatus::Cancelled);
    assert!(outcome.note.unwrap().contains("retained"));
}

#[tokio::test]
async fn test_status_check_degrades_when_provider_is_down() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;

    harness.provider.set_unreachable("gateway timeout");
    let outcome = harness
        .orchestrator
        .check_certificate_status(&created.reference_number)
        .await
        .unwrap();

    // best-effort: last known status plus an annotation, no error
    assert_eq!(outcome.status, CertificateStatus::Completed);
    assert!(outcome.note.unwrap().contains("unavailable"));
}

// =============================================================================
// Download
// =============================================================================

fn pdf_link(url: &str) -> DownloadLink {
    DownloadLink {
        url: url.into(),
        link_type: DownloadLinkType::Pdf,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_download_serves_cache_within_ttl() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;
    harness
        .provider
        .set_download_links(vec![pdf_link("https://p.example/one.pdf")]);

    let first = harness
        .orchestrator
        .download_certificate(created.certificate_id)
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .download_certificate(created.certificate_id)
        .await
        .unwrap();

    assert_eq!(first.url, "https://p.example/one.pdf");
    assert_eq!(first.url, second.url);
    assert_eq!(first.link_type, DownloadLinkType::Pdf);
    // one provider fetch served both calls
    assert_eq!(harness.provider.download_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_download_refetches_after_expiry() {
    // zero TTL: every cached link is already expired
    let harness = Harness::with_config(OrchestratorConfig {
        download_cache_ttl: chrono::Duration::zero(),
    });
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;
    harness
        .provider
        .set_download_links(vec![pdf_link("https://p.example/one.pdf")]);

    harness
        .orchestrator
        .download_certificate(created.certificate_id)
        .await
        .unwrap();
    harness
        .orchestrator
        .download_certificate(created.certificate_id)
        .await
        .unwrap();

    assert_eq!(harness.provider.download_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_download_requires_completed_status() {
    let harness = Harness::new();
    let pending = harness.insert_raw_pending("POL9", "REG9", "C1").await;

    let err = harness
        .orchestrator
        .download_certificate(pending.id)
        .await
        .unwrap_err();
    match err {
        ServiceError::Validation { message, .. } => assert!(message.contains("pending")),
        other => panic!("expected Validation, got {other}"),
    }
}

#[tokio::test]
async fn test_download_with_no_links_is_external_api_error() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_certificate(request("POL1", "REG1", "C1"))
        .await
        .unwrap();
    harness.wait_for_settled(created.certificate_id).await;
    // provider answers with an empty link set

    let err = harness
        .orchestrator
        .download_certificate(created.certificate_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalApi(_)));
}

// =============================================================================
// Bulk
// =============================================================================

#[tokio::test]
async fn test_bulk_isolates_item_failures() {
    let harness = Harness::new();
    harness.seed_registry("POL2", "REG2", "C1", "ins-2");

    let bulk = harness
        .orchestrator
        .process_bulk_certificates(BulkCertificateRequest {
            requests: vec![
                request("POL1", "REG1", "C1"),
                // duplicate of the first business key
                request("POL1", "REG1", "C1"),
                request("POL2", "REG2", "C1"),
            ],
        })
        .await
        .unwrap();

    assert_eq!(bulk.total_requests, 3);
    assert_eq!(bulk.successful, 2);
    assert_eq!(bulk.failed, 1);
    assert_eq!(bulk.results.len(), 3);
    assert!(bulk.results[1].error.as_ref().unwrap().contains("active certificate"));
}

#[tokio::test]
async fn test_bulk_rejects_empty_batch() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .process_bulk_certificates(BulkCertificateRequest { requests: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation { .. }));
}

// =============================================================================
// Idempotent Creation
// =============================================================================

#[tokio::test]
async fn test_idempotent_creation_replays_first_outcome() {
    let harness = Harness::new();
    let body = request("POL1", "REG1", "C1");
    let hash = request_fingerprint(&body).unwrap();

    let first = run_idempotent(harness.store.as_ref(), "client-key-1", &hash, || {
        let body = body.clone();
        let orchestrator = &harness.orchestrator;
        async move { orchestrator.create_certificate(body).await }
    })
    .await
    .unwrap();

    // the retry replays the cached outcome without creating a second row
    let second = run_idempotent(harness.store.as_ref(), "client-key-1", &hash, || {
        let body = body.clone();
        let orchestrator = &harness.orchestrator;
        async move { orchestrator.create_certificate(body).await }
    })
    .await
    .unwrap();

    assert_eq!(first.certificate_id, second.certificate_id);
    assert_eq!(
        harness
            .orchestrator
            .search_certificates(Default::default())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_idempotency_key_reuse_with_different_body_conflicts() {
    let harness = Harness::new();
    harness.seed_registry("POL2", "REG2", "C1", "ins-2");

    let body_a = request("POL1", "REG1", "C1");
    let hash_a = request_fingerprint(&body_a).unwrap();
    run_idempotent(harness.store.as_ref(), "client-key-1", &hash_a, || {
        let orchestrator = &harness.orchestrator;
        async move { orchestrator.create_certificate(body_a).await }
    })
    .await
    .unwrap();

    let body_b = request("POL2", "REG2", "C1");
    let hash_b = request_fingerprint(&body_b).unwrap();
    let err = run_idempotent(harness.store.as_ref(), "client-key-1", &hash_b, || {
        let orchestrator = &harness.orchestrator;
        async move { orchestrator.create_certificate(body_b).await }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ServiceError::IdempotencyKeyReuse));
}
