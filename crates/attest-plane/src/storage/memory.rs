//! In-memory storage backend
//!
//! Default backend using in-memory hashmaps behind RwLocks. Suitable
//! for development, tests, and single-instance deployments. Data is
//! lost on restart.
//!
//! The duplicate check and the pending insert happen under one write
//! lock, so the active-business-key invariant holds under concurrency
//! exactly like the PostgreSQL partial unique index does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use attest_core::{Certificate, CertificateStatus};

use super::{
    CertificateFilter, CertificateStore, CertificateUpdate, IdempotencyRecord, IdempotencyStatus,
    IdempotencyStore, NewCertificate, StorageError, DEFAULT_SEARCH_LIMIT,
};

/// In-memory store implementing both the certificate store and the
/// idempotency ledger
#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: RwLock<HashMap<Uuid, Certificate>>,
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn insert_pending(&self, new: NewCertificate) -> Result<Certificate, StorageError> {
        // single critical section: conflict check + insert
        let mut certificates = self.certificates.write().unwrap();

        if let Some(existing) = certificates.values().find(|c| {
            c.policy_number == new.policy_number
                && c.registration_number == new.registration_number
                && c.company_code == new.company_code
                && c.status.is_active()
        }) {
            return Err(StorageError::ActiveConflict {
                id: existing.id,
                status: existing.status,
            });
        }

        let now = Utc::now();
        let certificate = Certificate {
            id: Uuid::new_v4(),
            reference_number: new.reference_number,
            status: CertificateStatus::Pending,
            policy_id: new.policy_id,
            insured_id: new.insured_id,
            policy_number: new.policy_number,
            registration_number: new.registration_number,
            company_code: new.company_code,
            agent_code: new.agent_code,
            created_by: new.created_by,
            provider_request_number: None,
            certificate_number: None,
            download_url: None,
            download_expires_at: None,
            error_message: None,
            metadata: new.metadata,
            idempotency_key: new.idempotency_key,
            created_at: now,
            updated_at: now,
        };

        info!(
            id = %certificate.id,
            reference = %certificate.reference_number,
            policy = %certificate.policy_number,
            "Inserted pending certificate"
        );
        certificates.insert(certificate.id, certificate.clone());
        Ok(certificate)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Certificate>, StorageError> {
        let certificates = self.certificates.read().unwrap();
        Ok(certificates.get(&id).cloned())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Certificate>, StorageError> {
        let certificates = self.certificates.read().unwrap();
        Ok(certificates
            .values()
            .find(|c| c.reference_number == reference)
            .cloned())
    }

    async fn find_by_business_key(
        &self,
        policy_number: &str,
        registration_number: &str,
        company_code: &str,
    ) -> Result<Vec<Certificate>, StorageError> {
        let certificates = self.certificates.read().unwrap();
        Ok(certificates
            .values()
            .filter(|c| {
                c.policy_number == policy_number
                    && c.registration_number == registration_number
                    && c.company_code == company_code
            })
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: Uuid,
        update: CertificateUpdate,
    ) -> Result<Certificate, StorageError> {
        let mut certificates = self.certificates.write().unwrap();
        let certificate = certificates
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("certificate {id}")))?;

        if let Some(next) = update.status {
            if !update.reconcile && !certificate.status.can_transition_to(next) {
                return Err(StorageError::IllegalTransition {
                    from: certificate.status,
                    to: next,
                });
            }
            certificate.status = next;
        }
        if let Some(ref bag) = update.merge_metadata {
            certificate.metadata.merge(bag);
        }
        apply_scalar_fields(certificate, &update);
        certificate.updated_at = Utc::now();

        Ok(certificate.clone())
    }

    async fn search(&self, filter: CertificateFilter) -> Result<Vec<Certificate>, StorageError> {
        let certificates = self.certificates.read().unwrap();
        let mut matching: Vec<Certificate> = certificates
            .values()
            .filter(|c| {
                filter.status.is_none_or(|s| c.status == s)
                    && filter
                        .policy_number
                        .as_deref()
                        .is_none_or(|p| c.policy_number == p)
                    && filter
                        .company_code
                        .as_deref()
                        .is_none_or(|cc| c.company_code == cc)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

fn apply_scalar_fields(certificate: &mut Certificate, update: &CertificateUpdate) {
    if let Some(ref v) = update.provider_request_number {
        certificate.provider_request_number = Some(v.clone());
    }
    if let Some(ref v) = update.certificate_number {
        certificate.certificate_number = Some(v.clone());
    }
    if let Some(ref v) = update.download_url {
        certificate.download_url = Some(v.clone());
    }
    if let Some(v) = update.download_expires_at {
        certificate.download_expires_at = Some(v);
    }
    if let Some(ref v) = update.error_message {
        certificate.error_message = Some(v.clone());
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn create_pending(
        &self,
        key: &str,
        request_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        // first writer wins, same as a primary-key insert
        let mut ledger = self.idempotency.write().unwrap();
        if ledger.contains_key(key) {
            return Err(StorageError::AlreadyExists(format!("idempotency key {key}")));
        }
        ledger.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                request_hash: request_hash.to_string(),
                status: IdempotencyStatus::Pending,
                response_body: None,
                created_at: Utc::now(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StorageError> {
        let ledger = self.idempotency.read().unwrap();
        Ok(ledger.get(key).cloned())
    }

    async fn complete(
        &self,
        key: &str,
        response_body: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut ledger = self.idempotency.write().unwrap();
        let record = ledger
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(format!("idempotency key {key}")))?;
        record.status = IdempotencyStatus::Completed;
        record.response_body = Some(response_body);
        Ok(())
    }

    async fn fail(&self, key: &str) -> Result<(), StorageError> {
        let mut ledger = self.idempotency.write().unwrap();
        let record = ledger
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(format!("idempotency key {key}")))?;
        record.status = IdempotencyStatus::Failed;
        Ok(())
    }

    async fn reset_for_retry(&self, key: &str) -> Result<bool, StorageError> {
        let mut ledger = self.idempotency.write().unwrap();
        match ledger.get_mut(key) {
            Some(record) if record.status == IdempotencyStatus::Failed => {
                record.status = IdempotencyStatus::Pending;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(format!("idempotency key {key}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.idempotency.write().unwrap().remove(key);
        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut ledger = self.idempotency.write().unwrap();
        let before = ledger.len();
        ledger.retain(|_, record| !record.is_expired(now));
        let removed = before - ledger.len();
        if removed > 0 {
            info!(removed, "Swept expired idempotency keys");
        }
        Ok(removed)
    }
}
