//! Wire and read-model types for the registry and the provider
//!
//! The provider's API speaks French-flavored field names
//! (`code_demandeur`, `numero_attestation`, ...); structs here keep
//! English field names and rename on the wire so the rest of the
//! platform never sees provider vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attest_core::DownloadLinkType;

// =============================================================================
// Registry read models
// =============================================================================

/// An insurance policy as mirrored from the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Registry identifier
    pub id: String,

    pub policy_number: String,

    pub company_code: String,

    /// Vehicle registration covered by the policy
    pub registration_number: String,

    /// Insured party holding the policy
    pub insured_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

/// An insured party as mirrored from the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuredParty {
    /// Registry identifier
    pub id: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

// =============================================================================
// Provider wire types
// =============================================================================

/// Operation codes the provider accepts for status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCode {
    /// Cancel an issued attestation
    Cancel,
    /// Suspend an issued attestation
    Suspend,
}

impl OperationCode {
    /// The provider's wire value for this operation
    pub fn wire_code(self) -> &'static str {
        match self {
            OperationCode::Cancel => "109",
            OperationCode::Suspend => "120",
        }
    }
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationCode::Cancel => write!(f, "cancel"),
            OperationCode::Suspend => write!(f, "suspend"),
        }
    }
}

/// Everything the orchestrator hands over to request one attestation
///
/// Built from registry data; the HTTP gateway flattens it onto the
/// provider's wire format and injects the requester code.
#[derive(Debug, Clone)]
pub struct AttestationOrder {
    /// Our reference number, echoed back by the provider
    pub request_reference: String,

    pub policy: Policy,

    pub insured: InsuredParty,

    pub agent_code: Option<String>,
}

/// Provider attestation creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttestationRequest {
    #[serde(rename = "code_demandeur")]
    pub requester_code: String,

    #[serde(rename = "reference_demande")]
    pub request_reference: String,

    #[serde(rename = "numero_police")]
    pub policy_number: String,

    #[serde(rename = "code_compagnie")]
    pub company_code: String,

    #[serde(rename = "immatriculation")]
    pub registration_number: String,

    #[serde(rename = "nom_assure")]
    pub insured_name: String,

    #[serde(rename = "code_agent", skip_serializing_if = "Option::is_none")]
    pub agent_code: Option<String>,
}

/// Provider attestation creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttestationResponse {
    /// The provider's own success flag; a 200 with `success: false`
    /// still means the request was rejected
    pub success: bool,

    #[serde(rename = "numero_demande", skip_serializing_if = "Option::is_none")]
    pub request_number: Option<String>,

    #[serde(rename = "numero_attestation", skip_serializing_if = "Option::is_none")]
    pub certificate_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Additional payload the provider attaches (QR data, validity, ...)
    #[serde(rename = "donnees", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Provider status-check request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheckRequest {
    #[serde(rename = "code_demandeur")]
    pub requester_code: String,

    #[serde(rename = "reference_demande")]
    pub request_reference: String,
}

/// Provider status-check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheckResponse {
    /// Integer status code, mapped locally by
    /// `attest_core::map_provider_status`
    #[serde(rename = "statut")]
    pub status_code: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Provider update-status request (cancel/suspend)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(rename = "code_demandeur")]
    pub requester_code: String,

    #[serde(rename = "numero_attestation")]
    pub certificate_numbers: Vec<String>,

    #[serde(rename = "code_operation")]
    pub operation_code: String,
}

/// Provider update-status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One downloadable artifact exposed by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,

    #[serde(rename = "type")]
    pub link_type: DownloadLinkType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
