//! Idempotency wrapper
//!
//! Generic decorator making any request-handling future execute at most
//! once per (key, request fingerprint) pair:
//!
//! 1. Unknown key: a pending ledger record is inserted (first writer
//!    wins at the storage layer), then the wrapped future runs
//! 2. Known key, different fingerprint: key-reuse conflict, the future
//!    never runs
//! 3. Known key, completed: the cached response is replayed verbatim
//! 4. Known key, pending: in-flight conflict, the future never runs
//!    concurrently for the same key
//! 5. Known key, failed: the record is atomically reset to pending and
//!    the future runs again (retry)
//!
//! On success the result is cached and the record completed; on error
//! the record is marked failed and the original error is rethrown.
//! Records expire after 24 hours and are swept periodically.

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::storage::{IdempotencyStatus, IdempotencyStore, StorageError};

/// How long a ledger record stays replayable
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// Fingerprint of a logical request body: SHA-256 over its canonical
/// JSON form, hex-encoded
pub fn request_fingerprint<T: Serialize>(request: &T) -> Result<String> {
    let bytes = serde_json::to_vec(request)
        .map_err(|e| ServiceError::Internal(format!("request not serializable: {e}")))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Fresh random key for clients that do not supply their own
pub fn generate_idempotency_key() -> String {
    Uuid::new_v4().to_string()
}

/// Execute `make_fut` at most once per (key, fingerprint) pair
///
/// The cached response is the serialized success value; replays
/// deserialize it back, so `T` must round-trip through JSON.
pub async fn run_idempotent<T, F, Fut>(
    store: &dyn IdempotencyStore,
    key: &str,
    request_hash: &str,
    make_fut: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let now = Utc::now();
    let expires_at = now + Duration::hours(IDEMPOTENCY_TTL_HOURS);

    match store.get(key).await? {
        None => {
            claim_key(store, key, request_hash, expires_at).await?;
        }
        Some(record) if record.is_expired(now) => {
            // expired records are dead weight; replace rather than replay
            debug!(key = %key, "Replacing expired idempotency record");
            store.delete(key).await?;
            claim_key(store, key, request_hash, expires_at).await?;
        }
        Some(record) => {
            if record.request_hash != request_hash {
                warn!(key = %key, "Idempotency key reused with a different request");
                return Err(ServiceError::IdempotencyKeyReuse);
            }
            match record.status {
                IdempotencyStatus::Completed => {
                    let body = record.response_body.ok_or_else(|| {
                        ServiceError::Internal("completed record without response body".into())
                    })?;
                    debug!(key = %key, "Replaying cached idempotent response");
                    return serde_json::from_value(body).map_err(|e| {
                        ServiceError::Internal(format!("cached response not deserializable: {e}"))
                    });
                }
                IdempotencyStatus::Pending => {
                    return Err(ServiceError::IdempotencyInFlight);
                }
                IdempotencyStatus::Failed => {
                    // retry allowed, but only one caller wins the reset
                    if !store.reset_for_retry(key).await? {
                        return Err(ServiceError::IdempotencyInFlight);
                    }
                }
            }
        }
    }

    match make_fut().await {
        Ok(value) => {
            let body = serde_json::to_value(&value)
                .map_err(|e| ServiceError::Internal(format!("response not serializable: {e}")))?;
            store.complete(key, body).await?;
            Ok(value)
        }
        Err(err) => {
            // the caller sees the real error, not a ledger error
            if let Err(ledger_err) = store.fail(key).await {
                warn!(key = %key, error = %ledger_err, "Failed to mark idempotency record failed");
            }
            Err(err)
        }
    }
}

async fn claim_key(
    store: &dyn IdempotencyStore,
    key: &str,
    request_hash: &str,
    expires_at: chrono::DateTime<Utc>,
) -> Result<()> {
    match store.create_pending(key, request_hash, expires_at).await {
        Ok(()) => Ok(()),
        // lost the insert race: a concurrent request holds the key
        Err(StorageError::AlreadyExists(_)) => Err(ServiceError::IdempotencyInFlight),
        Err(e) => Err(e.into()),
    }
}

/// Delete expired ledger records, returning the count removed
pub async fn sweep_expired(store: &dyn IdempotencyStore) -> Result<usize> {
    Ok(store.sweep_expired(Utc::now()).await?)
}
