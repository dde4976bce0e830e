use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    ConsentRequestStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

text_enum! {
    ConsentResponse {
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    ContractStatus {
        Active => "active",
        Revoked => "revoked",
        Expired => "expired",
        Suspended => "suspended",
    }
}

text_enum! {
    ConsentRequestType {
        DataAccess => "data_access",
        Research => "research",
        Insurance => "insurance",
        Referral => "referral",
        LegalRequest => "legal_request",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub id: Uuid,
    pub request_number: String,
    pub requester_id: Uuid,
    pub patient_id: Uuid,
    pub request_type: ConsentRequestType,
    pub requested_data_types: serde_json::Value,
    pub purpose: String,
    pub status: ConsentRequestStatus,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<Uuid>,
    pub response_notes: Option<String>,
    pub contract_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CONSENT_REQUEST_COLUMNS: &str = "id, request_number, requester_id, patient_id, \
     request_type, requested_data_types, purpose, status, expires_at, responded_at, \
     responded_by, response_notes, contract_id, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsentContract {
    pub id: Uuid,
    pub contract_number: String,
    pub consent_request_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub requester_id: Uuid,
    pub contract_type: ConsentRequestType,
    pub data_scope: serde_json::Value,
    pub purpose: String,
    pub status: ContractStatus,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub signed_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CONSENT_CONTRACT_COLUMNS: &str = "id, contract_number, consent_request_id, patient_id, \
     requester_id, contract_type, data_scope, purpose, status, valid_from, valid_until, \
     signed_at, revoked_at, revoked_reason, created_at, updated_at";

impl ConsentContract {
    /// The data types this contract grants, as stored in `data_scope`.
    pub fn scopes(&self) -> Vec<&str> {
        self.data_scope
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsentAuditEntry {
    pub id: Uuid,
    pub consent_request_id: Option<Uuid>,
    pub consent_contract_id: Option<Uuid>,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<String>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const CONSENT_AUDIT_COLUMNS: &str = "id, consent_request_id, consent_contract_id, action, \
     actor_id, actor_role, details, ip_address, created_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsentRequest {
    pub patient_id: Uuid,
    /// Only admins may file on behalf of another requester.
    pub requester_id: Option<Uuid>,
    pub request_type: ConsentRequestType,
    #[validate(length(min = 1, message = "at least one data type is required"))]
    pub requested_data_types: Vec<String>,
    #[validate(length(min = 10, max = 2000))]
    pub purpose: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RespondConsentRequest {
    pub response: ConsentResponse,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    /// End of the resulting contract, when approving.
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevokeContractRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequestListQuery {
    pub status: Option<ConsentRequestStatus>,
    pub patient_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractListQuery {
    pub status: Option<ContractStatus>,
    pub patient_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckQuery {
    pub patient_id: Uuid,
    pub requester_id: Uuid,
    pub data_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheck {
    pub allowed: bool,
    pub contract_id: Option<Uuid>,
    pub valid_until: Option<DateTime<Utc>>,
}
