use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

text_enum! {
    AuditStatus {
        Success => "success",
        Failure => "failure",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
}

pub const AUDIT_LOG_COLUMNS: &str = "a.id, a.user_id, u.username, a.action, a.resource_type, \
     a.resource_id, a.details, a.ip_address, a.user_agent, a.status, a.created_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogListQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<AuditStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AuditStatsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub day: NaiveDate,
    pub total: i64,
    pub failures: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub days: i64,
    pub total: i64,
    pub failures: i64,
    pub by_action: Vec<ActionCount>,
    pub by_day: Vec<DailyCount>,
}
