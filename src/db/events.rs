//! Side-effect rows written alongside the main change: audit log entries,
//! notifications, consent audit trail, and record numbers.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{Executor, PgPool, Postgres};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::core::identifiers::{format_number, RecordKind};
use crate::error::{ApiError, ApiResult};
use crate::models::audit::AuditStatus;
use crate::models::notification::NewNotification;
use crate::models::user::Role;

/// Draw the next value of the kind's sequence and format it.
pub async fn next_number<'e, E>(executor: E, kind: RecordKind) -> Result<String, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let seq: i64 = sqlx::query_scalar("SELECT nextval($1::regclass)")
        .bind(kind.sequence())
        .fetch_one(executor)
        .await?;
    Ok(format_number(kind, Utc::now(), seq))
}

/// One `audit_logs` row.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AuditStatus,
}

impl AuditEntry {
    pub fn new(action: &'static str, resource_type: &'static str) -> Self {
        Self {
            user_id: None,
            action,
            resource_type,
            resource_id: None,
            details: Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
            status: AuditStatus::Success,
        }
    }

    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = AuditStatus::Failure;
        self
    }

    /// The failure row for an action the server refused, or `None` when
    /// `err` is not a refusal (bad input, missing rows, server faults).
    pub fn rejected(self, err: &ApiError) -> Option<Self> {
        match err {
            ApiError::Forbidden(_) | ApiError::Conflict { .. } | ApiError::BadRequest { .. } => Some(
                self.failed()
                    .details(json!({ "code": err.code(), "message": err.to_string() })),
            ),
            _ => None,
        }
    }
}

pub async fn insert_audit<'e, E>(executor: E, entry: &AuditEntry) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO audit_logs (user_id, action, resource_type, resource_id, details, \
         ip_address, user_agent, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.details)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(entry.status)
    .execute(executor)
    .await?;
    Ok(())
}

/// Write an audit row outside any transaction. The response is already
/// decided at this point, so a failed write is logged and swallowed.
#[instrument(skip(pool, entry), fields(action = entry.action, resource = entry.resource_type))]
pub async fn audit(pool: &PgPool, entry: AuditEntry) {
    if let Err(err) = insert_audit(pool, &entry).await {
        warn!(error = %err, "failed to write audit log");
    }
}

/// Pass `result` through, recording a failure row first when the action was refused.
pub async fn audit_outcome<T>(
    pool: &PgPool,
    result: ApiResult<T>,
    entry: impl FnOnce() -> AuditEntry,
) -> ApiResult<T> {
    if let Err(err) = &result {
        if let Some(entry) = entry().rejected(err) {
            audit(pool, entry).await;
        }
    }
    result
}

pub async fn notify<'e, E>(executor: E, user_id: Uuid, n: &NewNotification) -> Result<Uuid, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        "INSERT INTO notifications (user_id, title, message, notification_type, priority, \
         related_entity_type, related_entity_id) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(user_id)
    .bind(&n.title)
    .bind(&n.message)
    .bind(n.notification_type)
    .bind(n.priority)
    .bind(n.related_entity_type)
    .bind(n.related_entity_id)
    .fetch_one(executor)
    .await
}

/// One notification per active user holding `role`. Returns how many were written.
pub async fn notify_role<'e, E>(executor: E, role: Role, n: &NewNotification) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "INSERT INTO notifications (user_id, title, message, notification_type, priority, \
         related_entity_type, related_entity_id) \
         SELECT id, $2, $3, $4, $5, $6, $7 FROM users WHERE role = $1 AND is_active",
    )
    .bind(role)
    .bind(&n.title)
    .bind(&n.message)
    .bind(n.notification_type)
    .bind(n.priority)
    .bind(n.related_entity_type)
    .bind(n.related_entity_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// One `consent_audit_trail` row.
#[derive(Debug, Clone)]
pub struct ConsentTrail {
    pub request_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub action: &'static str,
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<Role>,
    pub details: Value,
    pub ip_address: Option<String>,
}

pub async fn consent_trail<'e, E>(executor: E, t: &ConsentTrail) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO consent_audit_trail (consent_request_id, consent_contract_id, action, \
         actor_id, actor_role, details, ip_address) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(t.request_id)
    .bind(t.contract_id)
    .bind(t.action)
    .bind(t.actor_id)
    .bind(t.actor_role)
    .bind(&t.details)
    .bind(&t.ip_address)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ApiError::forbidden("not yours"), Some("FORBIDDEN") ; "forbidden")]
    #[test_case(ApiError::conflict("REQUEST_ALREADY_PROCESSED", "done"), Some("REQUEST_ALREADY_PROCESSED") ; "conflict")]
    #[test_case(ApiError::bad_request("REQUEST_EXPIRED", "late"), Some("REQUEST_EXPIRED") ; "expired")]
    #[test_case(ApiError::Validation("bad".into()), None ; "validation")]
    #[test_case(ApiError::NotFound("Patient"), None ; "not found")]
    #[test_case(ApiError::Database(sqlx::Error::PoolTimedOut), None ; "database")]
    fn only_refusals_become_failure_rows(err: ApiError, code: Option<&str>) {
        let entry = AuditEntry::new("RESPOND", "consent_request").resource(Uuid::nil()).rejected(&err);
        assert_eq!(entry.as_ref().map(|e| e.details["code"].as_str().unwrap_or_default()), code);
        if let Some(entry) = entry {
            assert_eq!(entry.status, AuditStatus::Failure);
            assert_eq!(entry.resource_id.as_deref(), Some("00000000-0000-0000-0000-000000000000"));
            assert_eq!(entry.details["message"], err.to_string());
        }
    }
}
