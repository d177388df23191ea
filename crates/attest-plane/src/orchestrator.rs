//! Certificate Orchestrator
//!
//! THIS IS THE HEART OF THE ATTESTATION PLANE.
//!
//! The orchestrator drives every certificate through its lifecycle:
//!
//! 1. Creation validates the request, checks the registry, and commits
//!    a pending certificate; duplicate rejection is settled by the
//!    store's active-business-key constraint
//! 2. Submission to the provider runs as a detached background task;
//!    the client already holds a `pending` response and polls
//! 3. Status checks reconcile local state against the provider's
//!    authoritative answer, best-effort, without ever breaking polling
//! 4. Cancel/suspend/download operate on completed certificates with
//!    per-item isolation for batches
//!
//! Provider failures never corrupt local state: every error in the
//! detached task is captured as the certificate's `failed` state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use attest_core::{
    generate_reference_number, map_provider_status, Certificate, CertificateStatus,
    CreateCertificateRequest, DownloadLinkType, Metadata,
};
use attest_gateway::{
    AttestationOrder, DownloadLink, OperationCode, ProviderGateway, RegistryGateway,
};

use crate::audit::{AuditAction, AuditRecord, AuditSink};
use crate::error::{Result, ServiceError};
use crate::storage::{CertificateFilter, CertificateStore, CertificateUpdate, NewCertificate};

/// Metadata key under which the cached download link type is remembered
const DOWNLOAD_LINK_TYPE_KEY: &str = "download_link_type";

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a fetched download link is served from cache
    pub download_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            download_cache_ttl: Duration::hours(24),
        }
    }
}

/// Result of a creation call: always `pending`, the rest happens in the
/// background
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCertificateOutcome {
    pub certificate_id: Uuid,
    pub reference_number: String,
    pub status: CertificateStatus,
    pub message: String,
}

/// Result of a status check, best-effort against the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheckOutcome {
    pub certificate_id: Uuid,
    pub reference_number: String,
    pub status: CertificateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Batch cancel/suspend request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusRequest {
    pub certificate_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

/// One failed batch item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub certificate_id: Uuid,
    pub error: String,
}

/// Batch cancel/suspend result; one item's failure never aborts the rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BatchItemError>,
}

/// Resolved download link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub url: String,
    #[serde(rename = "type")]
    pub link_type: DownloadLinkType,
    pub expires_at: DateTime<Utc>,
}

/// Bulk creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCertificateRequest {
    pub requests: Vec<CreateCertificateRequest>,
}

/// One bulk item: the original request plus its outcome or error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemOutcome {
    pub request: CreateCertificateRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CreateCertificateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bulk creation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub batch_id: Uuid,
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkItemOutcome>,
    pub processing_time_ms: u64,
}

/// The state-machine driver for certificates
pub struct CertificateOrchestrator {
    store: Arc<dyn CertificateStore>,
    registry: Arc<dyn RegistryGateway>,
    provider: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

impl CertificateOrchestrator {
    /// Wire an orchestrator from its collaborators
    pub fn new(
        store: Arc<dyn CertificateStore>,
        registry: Arc<dyn RegistryGateway>,
        provider: Arc<dyn ProviderGateway>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            provider,
            audit,
            config,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a certificate and launch its submission
    ///
    /// Returns as soon as the pending certificate is durably stored and
    /// the background submission is enqueued. The flow is:
    ///
    /// 1. Validate mandatory fields (before any I/O)
    /// 2. Advisory duplicate probe, for a fast and descriptive rejection
    /// 3. Fetch policy + insured party from the registry
    /// 4. Insert the pending certificate; the store's active-key
    ///    constraint settles any creation race
    /// 5. Emit the `created` audit record
    /// 6. Spawn the detached provider submission and return `pending`
    pub async fn create_certificate(
        &self,
        request: CreateCertificateRequest,
    ) -> Result<CreateCertificateOutcome> {
        // Step 1: field validation, no I/O yet
        request.validate()?;

        // Step 2: advisory duplicate probe; the insert below re-checks
        // atomically, this one exists to answer fast with the conflict
        if let Some(existing) = self
            .find_active_conflict(
                &request.policy_number,
                &request.registration_number,
                &request.company_code,
            )
            .await?
        {
            return Err(ServiceError::DuplicateCertificate {
                id: existing.id,
                status: existing.status,
            });
        }

        // Step 3: registry lookups; a missing policy or insured party
        // aborts before anything is written
        let policy = self
            .registry
            .fetch_policy(&request.policy_number, &request.company_code)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "policy {} for company {}",
                    request.policy_number, request.company_code
                ))
            })?;

        let insured = self
            .registry
            .fetch_insured(&policy.insured_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("insured party {}", policy.insured_id))
            })?;

        // Step 4: atomic duplicate-check + pending insert
        let reference_number = generate_reference_number();
        let certificate = self
            .store
            .insert_pending(NewCertificate {
                reference_number: reference_number.clone(),
                policy_id: policy.id.clone(),
                insured_id: insured.id.clone(),
                policy_number: request.policy_number.clone(),
                registration_number: request.registration_number.clone(),
                company_code: request.company_code.clone(),
                agent_code: request.agent_code.clone(),
                created_by: request.requested_by.clone(),
                idempotency_key: request.idempotency_key.clone(),
                metadata: request.metadata.clone(),
            })
            .await?;

        // Step 5: audit the creation
        self.audit
            .record(
                AuditRecord::new(certificate.id, AuditAction::Created)
                    .with_actor(&request.requested_by),
            )
            .await;

        info!(
            id = %certificate.id,
            reference = %certificate.reference_number,
            policy = %certificate.policy_number,
            "Certificate created, submission enqueued"
        );

        // Step 6: detach the provider submission; the caller gets
        // `pending` now and polls for the outcome
        let order = AttestationOrder {
            request_reference: certificate.reference_number.clone(),
            policy,
            insured,
            agent_code: request.agent_code.clone(),
        };
        self.spawn_submission(certificate.id, order);

        Ok(CreateCertificateOutcome {
            certificate_id: certificate.id,
            reference_number,
            status: CertificateStatus::Pending,
            message: "Certificate accepted; submission to the provider is in progress".into(),
        })
    }

    /// Hand the submission to the runtime without awaiting it
    fn spawn_submission(&self, certificate_id: Uuid, order: AttestationOrder) {
        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);

        tokio::spawn(async move {
            run_submission(store, provider, certificate_id, order).await;
        });
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Apply a status transition with merged metadata
    ///
    /// Audits the old/new pair only when an actor is supplied.
    pub async fn update_certificate_status(
        &self,
        id: Uuid,
        status: CertificateStatus,
        metadata: Option<Metadata>,
        actor: Option<&str>,
    ) -> Result<Certificate> {
        let before = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate {id}")))?;

        let update = CertificateUpdate {
            status: Some(status),
            merge_metadata: metadata,
            ..Default::default()
        };
        let updated = self.store.update(id, update).await?;

        if let Some(actor) = actor {
            self.audit
                .record(
                    AuditRecord::new(id, AuditAction::StatusChanged)
                        .with_actor(actor)
                        .with_transition(before.status, updated.status),
                )
                .await;
        }

        Ok(updated)
    }

    /// Check a certificate's status, reconciling against the provider
    ///
    /// Best-effort by contract: a provider failure degrades to the
    /// last-known local status with an annotation, it never propagates.
    /// Reconciliation is one-directional: a locally cancelled or
    /// suspended certificate is never resurrected by a lagging provider.
    pub async fn check_certificate_status(&self, reference: &str) -> Result<StatusCheckOutcome> {
        let certificate = self
            .store
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate reference {reference}")))?;

        // nothing submitted yet: local status is all there is
        if certificate.provider_request_number.is_none() {
            return Ok(StatusCheckOutcome {
                certificate_id: certificate.id,
                reference_number: certificate.reference_number,
                status: certificate.status,
                provider_status_code: None,
                note: Some("not yet submitted to the provider; local status returned".into()),
            });
        }

        let provider_response = match self.provider.check_status(reference).await {
            Ok(response) => response,
            Err(err) => {
                warn!(reference = %reference, error = %err, "Provider status check failed");
                return Ok(StatusCheckOutcome {
                    certificate_id: certificate.id,
                    reference_number: certificate.reference_number,
                    status: certificate.status,
                    provider_status_code: None,
                    note: Some(format!(
                        "provider unavailable, returning last known status: {err}"
                    )),
                });
            }
        };

        let mapped = map_provider_status(provider_response.status_code);

        // locally-terminal operator decisions win over a lagging provider
        if matches!(
            certificate.status,
            CertificateStatus::Cancelled | CertificateStatus::Suspended
        ) {
            return Ok(StatusCheckOutcome {
                certificate_id: certificate.id,
                reference_number: certificate.reference_number,
                status: certificate.status,
                provider_status_code: Some(provider_response.status_code),
                note: Some(format!(
                    "provider reports '{mapped}'; local terminal status retained"
                )),
            });
        }

        if mapped == certificate.status {
            return Ok(StatusCheckOutcome {
                certificate_id: certificate.id,
                reference_number: certificate.reference_number,
                status: certificate.status,
                provider_status_code: Some(provider_response.status_code),
                note: None,
            });
        }

        info!(
            reference = %reference,
            local = %certificate.status,
            provider = %mapped,
            "Reconciling certificate status from provider"
        );
        let mut update = CertificateUpdate::status(mapped);
        update.reconcile = true;
        let updated = self.store.update(certificate.id, update).await?;

        Ok(StatusCheckOutcome {
            certificate_id: updated.id,
            reference_number: updated.reference_number,
            status: updated.status,
            provider_status_code: Some(provider_response.status_code),
            note: Some("status reconciled from provider".into()),
        })
    }

    // =========================================================================
    // Cancel / Suspend
    // =========================================================================

    /// Cancel a batch of completed certificates, item by item
    pub async fn cancel_certificates(&self, request: BatchStatusRequest) -> Result<BatchOutcome> {
        self.apply_batch_operation(
            request,
            OperationCode::Cancel,
            CertificateStatus::Cancelled,
            AuditAction::Cancelled,
        )
        .await
    }

    /// Suspend a batch of completed certificates, item by item
    pub async fn suspend_certificates(&self, request: BatchStatusRequest) -> Result<BatchOutcome> {
        self.apply_batch_operation(
            request,
            OperationCode::Suspend,
            CertificateStatus::Suspended,
            AuditAction::Suspended,
        )
        .await
    }

    async fn apply_batch_operation(
        &self,
        request: BatchStatusRequest,
        operation: OperationCode,
        target: CertificateStatus,
        action: AuditAction,
    ) -> Result<BatchOutcome> {
        if request.certificate_ids.is_empty() {
            return Err(ServiceError::validation("certificate_ids must not be empty"));
        }

        let mut outcome = BatchOutcome {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for id in request.certificate_ids {
            match self
                .apply_operation(id, operation, target, action, request.requested_by.as_deref())
                .await
            {
                Ok(()) => outcome.succeeded.push(id),
                Err(err) => outcome.failed.push(BatchItemError {
                    certificate_id: id,
                    error: err.to_string(),
                }),
            }
        }

        Ok(outcome)
    }

    async fn apply_operation(
        &self,
        id: Uuid,
        operation: OperationCode,
        target: CertificateStatus,
        action: AuditAction,
        actor: Option<&str>,
    ) -> Result<()> {
        let certificate = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate {id}")))?;

        // precondition: only completed certificates with a provider
        // certificate number can be cancelled or suspended
        if certificate.status != CertificateStatus::Completed {
            return Err(ServiceError::validation(format!(
                "certificate cannot be {target} from status '{}'",
                certificate.status
            )));
        }
        let certificate_number = certificate.certificate_number.clone().ok_or_else(|| {
            ServiceError::validation("certificate has no provider certificate number")
        })?;

        let response = self
            .provider
            .update_attestation_status(std::slice::from_ref(&certificate_number), operation)
            .await?;

        if !response.success {
            return Err(ServiceError::ExternalApi(
                response
                    .message
                    .unwrap_or_else(|| format!("provider refused {operation}")),
            ));
        }

        self.store
            .update(id, CertificateUpdate::status(target))
            .await?;

        let mut record = AuditRecord::new(id, action)
            .with_transition(CertificateStatus::Completed, target);
        if let Some(actor) = actor {
            record = record.with_actor(actor);
        }
        self.audit.record(record).await;

        info!(id = %id, operation = %operation, status = %target, "Certificate status updated");
        Ok(())
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Resolve a download link for a completed certificate
    ///
    /// Serves the cached URL while it is fresh; otherwise fetches links
    /// from the provider, prefers the PDF variant, and caches the pick.
    /// An empty link set is an external-API error, not a not-found: the
    /// certificate exists, the artifact is what's missing.
    pub async fn download_certificate(&self, id: Uuid) -> Result<DownloadOutcome> {
        let certificate = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate {id}")))?;

        if certificate.status != CertificateStatus::Completed {
            return Err(ServiceError::validation(format!(
                "certificate cannot be downloaded from status '{}'",
                certificate.status
            )));
        }

        let now = Utc::now();
        if certificate.download_cache_valid(now) {
            return Ok(DownloadOutcome {
                url: certificate.download_url.clone().unwrap_or_default(),
                link_type: cached_link_type(&certificate),
                expires_at: certificate.download_expires_at.unwrap_or(now),
            });
        }

        let certificate_number = certificate.certificate_number.clone().ok_or_else(|| {
            ServiceError::ExternalApi("certificate has no provider certificate number".into())
        })?;

        let links = self
            .provider
            .fetch_download_links(&certificate_number)
            .await?;
        let link = select_download_link(&links).ok_or_else(|| {
            ServiceError::ExternalApi("provider returned no download links".into())
        })?;

        let expires_at = now + self.config.download_cache_ttl;
        self.store
            .update(
                id,
                CertificateUpdate {
                    download_url: Some(link.url.clone()),
                    download_expires_at: Some(expires_at),
                    merge_metadata: Some(
                        Metadata::new().with(DOWNLOAD_LINK_TYPE_KEY, link.link_type.to_string()),
                    ),
                    ..Default::default()
                },
            )
            .await?;

        Ok(DownloadOutcome {
            url: link.url.clone(),
            link_type: link.link_type,
            expires_at,
        })
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Create many certificates sequentially with per-item isolation
    ///
    /// Sequential on purpose: each item settles independently, and a
    /// failing item must not roll back or starve its siblings.
    pub async fn process_bulk_certificates(
        &self,
        request: BulkCertificateRequest,
    ) -> Result<BulkOutcome> {
        if request.requests.is_empty() {
            return Err(ServiceError::validation("requests must not be empty"));
        }

        let batch_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        let total_requests = request.requests.len();
        let mut results = Vec::with_capacity(total_requests);
        let mut successful = 0;

        for item in request.requests {
            match self.create_certificate(item.clone()).await {
                Ok(outcome) => {
                    successful += 1;
                    results.push(BulkItemOutcome {
                        request: item,
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(err) => results.push(BulkItemOutcome {
                    request: item,
                    outcome: None,
                    error: Some(err.to_string()),
                }),
            }
        }

        let outcome = BulkOutcome {
            batch_id,
            total_requests,
            successful,
            failed: total_requests - successful,
            results,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            batch_id = %batch_id,
            total = outcome.total_requests,
            successful = outcome.successful,
            failed = outcome.failed,
            "Bulk certificate batch processed"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch a certificate by id
    pub async fn get_certificate(&self, id: Uuid) -> Result<Certificate> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate {id}")))
    }

    /// Fetch a certificate by reference number
    pub async fn get_certificate_by_reference(&self, reference: &str) -> Result<Certificate> {
        self.store
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate reference {reference}")))
    }

    /// First certificate blocking the business key, if any
    pub async fn find_active_conflict(
        &self,
        policy_number: &str,
        registration_number: &str,
        company_code: &str,
    ) -> Result<Option<Certificate>> {
        let matching = self
            .store
            .find_by_business_key(policy_number, registration_number, company_code)
            .await?;
        Ok(matching.into_iter().find(|c| c.status.is_active()))
    }

    /// Filtered listing, newest first
    pub async fn search_certificates(&self, filter: CertificateFilter) -> Result<Vec<Certificate>> {
        Ok(self.store.search(filter).await?)
    }
}

/// The detached submission task
///
/// Drives pending → processing → completed/failed. Never re-raises:
/// every failure is captured on the certificate, because the client
/// already received its `pending` response.
async fn run_submission(
    store: Arc<dyn CertificateStore>,
    provider: Arc<dyn ProviderGateway>,
    certificate_id: Uuid,
    order: AttestationOrder,
) {
    // Step 1: pending -> processing
    if let Err(err) = store
        .update(
            certificate_id,
            CertificateUpdate::status(CertificateStatus::Processing),
        )
        .await
    {
        warn!(id = %certificate_id, error = %err, "Could not mark certificate processing");
        return;
    }

    // Step 2: submit and settle the terminal state
    let update = match provider.create_attestation(&order).await {
        Ok(response) if response.success => {
            let mut update = CertificateUpdate::status(CertificateStatus::Completed);
            update.provider_request_number = response.request_number;
            update.certificate_number = response.certificate_number;
            if let Some(data) = response.data {
                if let Ok(bag) = Metadata::from_json_object(data) {
                    update.merge_metadata = Some(bag);
                }
            }
            update
        }
        Ok(response) => {
            let message = response
                .message
                .unwrap_or_else(|| "provider reported failure without a message".into());
            warn!(id = %certificate_id, error = %message, "Provider rejected attestation order");
            let mut update = CertificateUpdate::status(CertificateStatus::Failed);
            update.provider_request_number = response.request_number;
            update.error_message = Some(message);
            update
        }
        Err(err) => {
            warn!(id = %certificate_id, error = %err, "Attestation submission failed");
            let mut update = CertificateUpdate::status(CertificateStatus::Failed);
            update.error_message = Some(err.to_string());
            update
        }
    };

    let completed = update.status == Some(CertificateStatus::Completed);
    if let Err(err) = store.update(certificate_id, update).await {
        warn!(id = %certificate_id, error = %err, "Could not record submission outcome");
        return;
    }
    if completed {
        info!(id = %certificate_id, "Certificate completed");
    }
}

/// Prefer the PDF variant; fall back to whatever the provider offers
fn select_download_link(links: &[DownloadLink]) -> Option<&DownloadLink> {
    links
        .iter()
        .find(|l| l.link_type == DownloadLinkType::Pdf)
        .or_else(|| links.first())
}

/// Link type remembered alongside the cached URL; PDF when unknown
fn cached_link_type(certificate: &Certificate) -> DownloadLinkType {
    use attest_core::MetadataValue;
    match certificate.metadata.get(DOWNLOAD_LINK_TYPE_KEY) {
        Some(MetadataValue::String(s)) if s == "IMAGE" => DownloadLinkType::Image,
        Some(MetadataValue::String(s)) if s == "QRCODE" => DownloadLinkType::Qrcode,
        _ => DownloadLinkType::Pdf,
    }
}
