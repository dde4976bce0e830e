//! Consent request lifecycle.
//!
//! `pending` is the only state that accepts a response. A response that
//! arrives after `expires_at` expires the request instead of answering it.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::error::ApiError;
use crate::models::consent::{ConsentContract, ConsentRequestStatus, ConsentResponse, ContractStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsentError {
    #[error("consent request has already been {0}")]
    AlreadyProcessed(ConsentRequestStatus),
    #[error("consent request expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("expiry must be in the future")]
    ExpiryInPast,
    #[error("contract end must be after its start")]
    InvalidValidity,
    #[error("only pending requests can be cancelled")]
    NotCancellable,
    #[error("contract is already {0}")]
    ContractNotActive(ContractStatus),
}

impl From<ConsentError> for ApiError {
    fn from(err: ConsentError) -> Self {
        match err {
            ConsentError::AlreadyProcessed(_) => {
                ApiError::conflict("REQUEST_ALREADY_PROCESSED", err.to_string())
            }
            ConsentError::Expired(_) => ApiError::bad_request("REQUEST_EXPIRED", err.to_string()),
            ConsentError::ExpiryInPast | ConsentError::InvalidValidity => {
                ApiError::Validation(err.to_string())
            }
            ConsentError::NotCancellable => {
                ApiError::conflict("REQUEST_NOT_CANCELLABLE", err.to_string())
            }
            ConsentError::ContractNotActive(_) => {
                ApiError::conflict("CONTRACT_NOT_ACTIVE", err.to_string())
            }
        }
    }
}

/// Status a pending request moves to when answered at `now`.
pub fn respond(
    status: ConsentRequestStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    response: ConsentResponse,
) -> Result<ConsentRequestStatus, ConsentError> {
    if status != ConsentRequestStatus::Pending {
        return Err(ConsentError::AlreadyProcessed(status));
    }
    if now > expires_at {
        return Err(ConsentError::Expired(expires_at));
    }
    Ok(match response {
        ConsentResponse::Approved => ConsentRequestStatus::Approved,
        ConsentResponse::Rejected => ConsentRequestStatus::Rejected,
    })
}

pub fn cancel(status: ConsentRequestStatus) -> Result<ConsentRequestStatus, ConsentError> {
    match status {
        ConsentRequestStatus::Pending => Ok(ConsentRequestStatus::Cancelled),
        _ => Err(ConsentError::NotCancellable),
    }
}

/// `requested` if given and in the future, otherwise `now + ttl_hours`.
pub fn request_expiry(
    requested: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl_hours: i64,
) -> Result<DateTime<Utc>, ConsentError> {
    match requested {
        Some(at) if at <= now => Err(ConsentError::ExpiryInPast),
        Some(at) => Ok(at),
        None => Ok(now + Duration::hours(ttl_hours)),
    }
}

pub fn contract_validity(
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, ConsentError> {
    match valid_until {
        Some(until) if until <= valid_from => Err(ConsentError::InvalidValidity),
        other => Ok(other),
    }
}

pub fn revoke(status: ContractStatus) -> Result<ContractStatus, ConsentError> {
    match status {
        ContractStatus::Active | ContractStatus::Suspended => Ok(ContractStatus::Revoked),
        other => Err(ConsentError::ContractNotActive(other)),
    }
}

/// Canonical form of a requested data type: trimmed and lowercase.
/// Blank input names no data type.
pub fn normalize_data_type(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Whether `contract` grants access at `now`, optionally for one data type.
pub fn grants_access(contract: &ConsentContract, now: DateTime<Utc>, data_type: Option<&str>) -> bool {
    if contract.status != ContractStatus::Active || now < contract.valid_from {
        return false;
    }
    if contract.valid_until.is_some_and(|until| now > until) {
        return false;
    }
    match data_type.and_then(normalize_data_type) {
        None => true,
        Some(wanted) => contract
            .scopes()
            .iter()
            .any(|scope| *scope == wanted || *scope == "all"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::consent::ConsentRequestType;
    use test_case::test_case;
    use uuid::Uuid;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn pending_request_is_answered_once() {
        let expires = at(24);
        let approved = respond(ConsentRequestStatus::Pending, expires, at(1), ConsentResponse::Approved);
        assert_eq!(approved, Ok(ConsentRequestStatus::Approved));

        let again = respond(ConsentRequestStatus::Approved, expires, at(2), ConsentResponse::Rejected);
        assert_eq!(again, Err(ConsentError::AlreadyProcessed(ConsentRequestStatus::Approved)));
    }

    #[test]
    fn late_response_is_expired() {
        let expires = at(24);
        let late = respond(ConsentRequestStatus::Pending, expires, at(25), ConsentResponse::Approved);
        assert_eq!(late, Err(ConsentError::Expired(expires)));
        // exactly at the deadline is still in time
        let edge = respond(ConsentRequestStatus::Pending, expires, expires, ConsentResponse::Rejected);
        assert_eq!(edge, Ok(ConsentRequestStatus::Rejected));
    }

    #[test]
    fn expired_maps_to_bad_request() {
        use actix_web::ResponseError;
        let err: ApiError = ConsentError::Expired(at(0)).into();
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.code(), "REQUEST_EXPIRED");
        let err: ApiError = ConsentError::AlreadyProcessed(ConsentRequestStatus::Rejected).into();
        assert_eq!(err.status_code().as_u16(), 409);
    }

    #[test]
    fn default_expiry_uses_ttl() {
        assert_eq!(request_expiry(None, at(0), 48), Ok(at(48)));
        assert_eq!(request_expiry(Some(at(5)), at(0), 48), Ok(at(5)));
        assert_eq!(request_expiry(Some(at(0)), at(0), 48), Err(ConsentError::ExpiryInPast));
    }

    #[test]
    fn only_pending_can_be_cancelled() {
        assert_eq!(cancel(ConsentRequestStatus::Pending), Ok(ConsentRequestStatus::Cancelled));
        assert!(cancel(ConsentRequestStatus::Approved).is_err());
    }

    fn contract(status: ContractStatus, until: Option<DateTime<Utc>>, scope: serde_json::Value) -> ConsentContract {
        ConsentContract {
            id: Uuid::nil(),
            contract_number: "CC24000001".into(),
            consent_request_id: None,
            patient_id: Uuid::nil(),
            requester_id: Uuid::nil(),
            contract_type: ConsentRequestType::DataAccess,
            data_scope: scope,
            purpose: "Continuity of care".into(),
            status,
            valid_from: at(0),
            valid_until: until,
            signed_at: at(0),
            revoked_at: None,
            revoked_reason: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn access_respects_status_window_and_scope() {
        let scope = serde_json::json!(["lab_results", "prescriptions"]);
        let active = contract(ContractStatus::Active, Some(at(10)), scope.clone());
        assert!(grants_access(&active, at(5), None));
        assert!(grants_access(&active, at(5), Some("lab_results")));
        assert!(!grants_access(&active, at(5), Some("imaging")));
        assert!(!grants_access(&active, at(11), None));

        let revoked = contract(ContractStatus::Revoked, None, scope);
        assert!(!grants_access(&revoked, at(5), None));

        let everything = contract(ContractStatus::Active, None, serde_json::json!(["all"]));
        assert!(grants_access(&everything, at(1000), Some("imaging")));
    }

    #[test_case("lab_results", Some("lab_results") ; "already canonical")]
    #[test_case("  Lab_Results ", Some("lab_results") ; "padded mixed case")]
    #[test_case("   ", None ; "blank")]
    fn data_types_are_normalized(raw: &str, expected: Option<&str>) {
        assert_eq!(normalize_data_type(raw).as_deref(), expected);
    }

    #[test]
    fn access_check_ignores_data_type_case() {
        let stored: Vec<String> = ["Lab_Results"].iter().filter_map(|t| normalize_data_type(t)).collect();
        let active = contract(ContractStatus::Active, None, serde_json::json!(stored));
        assert!(grants_access(&active, at(1), Some("Lab_Results")));
        assert!(grants_access(&active, at(1), Some(" LAB_RESULTS")));
        assert!(!grants_access(&active, at(1), Some("Imaging")));
    }

    #[test]
    fn revoke_only_live_contracts() {
        assert_eq!(revoke(ContractStatus::Active), Ok(ContractStatus::Revoked));
        assert_eq!(revoke(ContractStatus::Expired), Err(ConsentError::ContractNotActive(ContractStatus::Expired)));
    }

    #[test]
    fn validity_must_end_after_start() {
        assert!(contract_validity(at(0), Some(at(0))).is_err());
        assert_eq!(contract_validity(at(0), Some(at(1))), Ok(Some(at(1))));
        assert_eq!(contract_validity(at(0), None), Ok(None));
    }
}
