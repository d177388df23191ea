//! Common types used across the attestation platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::CoreError;

/// Lifecycle status of a certificate
///
/// Transitions are restricted to the edges in [`CertificateStatus::can_transition_to`];
/// the store rejects any other write. `Completed` is terminal for the
/// issuance flow but can still move to `Cancelled` or `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// Created locally, not yet submitted to the provider
    Pending,
    /// Submission to the provider is in flight
    Processing,
    /// Provider generated the attestation
    Completed,
    /// Submission failed (provider rejection, network, circuit open)
    Failed,
    /// Cancelled with provider acknowledgement
    Cancelled,
    /// Suspended with provider acknowledgement
    Suspended,
}

impl CertificateStatus {
    /// Statuses that block creation of another certificate for the same
    /// business key
    pub const ACTIVE: [CertificateStatus; 3] = [
        CertificateStatus::Pending,
        CertificateStatus::Processing,
        CertificateStatus::Completed,
    ];

    /// Whether a certificate in this status counts against the
    /// one-active-per-business-key invariant
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Whether the lifecycle table permits moving from `self` to `next`
    ///
    /// Reconciliation against the provider bypasses this check through a
    /// dedicated path; every other writer goes through it.
    pub fn can_transition_to(self, next: CertificateStatus) -> bool {
        use CertificateStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Cancelled)
                | (Completed, Suspended)
        )
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateStatus::Pending => write!(f, "pending"),
            CertificateStatus::Processing => write!(f, "processing"),
            CertificateStatus::Completed => write!(f, "completed"),
            CertificateStatus::Failed => write!(f, "failed"),
            CertificateStatus::Cancelled => write!(f, "cancelled"),
            CertificateStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for CertificateStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CertificateStatus::Pending),
            "processing" => Ok(CertificateStatus::Processing),
            "completed" => Ok(CertificateStatus::Completed),
            "failed" => Ok(CertificateStatus::Failed),
            "cancelled" | "canceled" => Ok(CertificateStatus::Cancelled),
            "suspended" => Ok(CertificateStatus::Suspended),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

/// A single metadata value
///
/// The metadata bag is constrained to a small closed set of shapes so
/// the grow-only merge invariant stays checkable; arbitrary nested JSON
/// is still representable through the `Json` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Json(serde_json::Value),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Open key/value bag attached to every certificate
///
/// Writes merge into the existing bag; keys are added or overwritten,
/// never removed wholesale. Ordered so serialized forms are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from a JSON object; non-object input is rejected
    pub fn from_json_object(value: serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Object(map) => {
                let mut bag = Metadata::new();
                for (key, v) in map {
                    bag.0.insert(key, json_to_metadata_value(v));
                }
                Ok(bag)
            }
            other => Err(CoreError::InvalidMetadata {
                key: "<root>".into(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    /// Insert or overwrite a single entry
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Fluent insert for construction sites
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up an entry
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    /// Merge `other` into this bag: every key of `other` is added or
    /// overwritten, existing keys absent from `other` are kept
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

fn json_to_metadata_value(v: serde_json::Value) -> MetadataValue {
    match v {
        serde_json::Value::Bool(b) => MetadataValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else {
                MetadataValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => MetadataValue::String(s),
        other => MetadataValue::Json(other),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A certificate and its full lifecycle state
///
/// Owned exclusively by the certificate store; every other component
/// references it by id or reference number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Opaque identifier, immutable
    pub id: Uuid,

    /// Unique human-traceable reference, generated at creation
    pub reference_number: String,

    /// Lifecycle status
    pub status: CertificateStatus,

    /// Registry-mirrored policy reference, set once
    pub policy_id: String,

    /// Registry-mirrored insured-party reference, set once
    pub insured_id: String,

    /// Business key: policy number
    pub policy_number: String,

    /// Business key: vehicle registration number
    pub registration_number: String,

    /// Business key: issuing company code
    pub company_code: String,

    /// Optional agent code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_code: Option<String>,

    /// User who requested the certificate, immutable
    pub created_by: String,

    /// Provider-assigned request number, set by async submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_request_number: Option<String>,

    /// Provider-assigned certificate number, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_number: Option<String>,

    /// Cached download URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Expiry of the cached download URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_expires_at: Option<DateTime<Utc>>,

    /// Last error captured from a failed submission or provider call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Grow-only metadata bag
    #[serde(default)]
    pub metadata: Metadata,

    /// Idempotency key supplied at creation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Creation instant, immutable
    pub created_at: DateTime<Utc>,

    /// Bumped on every mutation
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    /// Whether a cached download link is still usable at `now`
    pub fn download_cache_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.download_url, self.download_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            _ => false,
        }
    }
}

/// Client-facing certificate creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCertificateRequest {
    pub policy_number: String,

    pub registration_number: String,

    pub company_code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_code: Option<String>,

    pub requested_by: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl CreateCertificateRequest {
    /// Reject blank mandatory fields before any I/O happens
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("policy_number", &self.policy_number),
            ("registration_number", &self.registration_number),
            ("company_code", &self.company_code),
            ("requested_by", &self.requested_by),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::MissingField(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Kind of downloadable artifact the provider exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadLinkType {
    Pdf,
    Image,
    Qrcode,
}

impl std::fmt::Display for DownloadLinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadLinkType::Pdf => write!(f, "PDF"),
            DownloadLinkType::Image => write!(f, "IMAGE"),
            DownloadLinkType::Qrcode => write!(f, "QRCODE"),
        }
    }
}

/// A resolved download link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub url: String,

    #[serde(rename = "type")]
    pub link_type: DownloadLinkType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            CertificateStatus::Pending,
            CertificateStatus::Processing,
            CertificateStatus::Completed,
            CertificateStatus::Failed,
            CertificateStatus::Cancelled,
            CertificateStatus::Suspended,
        ] {
            let parsed: CertificateStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
        assert!("frozen".parse::<CertificateStatus>().is_err());
    }

    #[test]
    fn test_status_active_set() {
        assert!(CertificateStatus::Pending.is_active());
        assert!(CertificateStatus::Processing.is_active());
        assert!(CertificateStatus::Completed.is_active());
        assert!(!CertificateStatus::Failed.is_active());
        assert!(!CertificateStatus::Cancelled.is_active());
        assert!(!CertificateStatus::Suspended.is_active());
    }

    #[test]
    fn test_legal_transitions() {
        use CertificateStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Suspended));
    }

    #[test]
    fn test_illegal_transitions() {
        use CertificateStatus::*;
        // pending can never jump straight to a terminal state
        assert!(!Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Suspended));
        // nothing moves out of failed/cancelled/suspended
        for from in [Failed, Cancelled, Suspended] {
            for to in [Pending, Processing, Completed, Failed, Cancelled, Suspended] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn test_metadata_merge_grows() {
        let mut bag = Metadata::new().with("source", "api").with("attempt", 1i64);

        let update = Metadata::new().with("attempt", 2i64).with("channel", "bulk");
        bag.merge(&update);

        assert_eq!(bag.len(), 3);
        assert_eq!(bag.get("source"), Some(&MetadataValue::String("api".into())));
        assert_eq!(bag.get("attempt"), Some(&MetadataValue::Integer(2)));
        assert_eq!(bag.get("channel"), Some(&MetadataValue::String("bulk".into())));
    }

    #[test]
    fn test_metadata_from_json_object() {
        let bag = Metadata::from_json_object(serde_json::json!({
            "vehicle": "REG-123",
            "premium": 125.5,
            "renewal": true,
            "extras": {"seats": 5}
        }))
        .unwrap();

        assert_eq!(bag.len(), 4);
        assert_eq!(bag.get("renewal"), Some(&MetadataValue::Bool(true)));
        assert!(matches!(bag.get("extras"), Some(MetadataValue::Json(_))));

        assert!(Metadata::from_json_object(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_create_request_validation() {
        let request = CreateCertificateRequest {
            policy_number: "POL1".into(),
            registration_number: "REG1".into(),
            company_code: "C1".into(),
            agent_code: None,
            requested_by: "U1".into(),
            idempotency_key: None,
            metadata: Metadata::new(),
        };
        assert!(request.validate().is_ok());

        let blank = CreateCertificateRequest {
            registration_number: "   ".into(),
            ..request
        };
        let err = blank.validate().unwrap_err();
        assert_eq!(err, CoreError::MissingField("registration_number".into()));
    }

    #[test]
    fn test_download_link_type_wire_form() {
        let json = serde_json::to_string(&DownloadInfo {
            url: "https://provider.example/att.pdf".into(),
            link_type: DownloadLinkType::Pdf,
        })
        .unwrap();
        assert!(json.contains(r#""type":"PDF""#));
    }
}
