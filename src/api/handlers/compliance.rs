use actix_web::web;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::middleware::AuthUser;
use crate::api::response::ApiResponse;
use crate::core::compliance::{score, ComplianceMetrics, ComplianceScore};
use crate::core::permissions::Permission;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const OVERVIEW_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub metrics: ComplianceMetrics,
    #[serde(flatten)]
    pub score: ComplianceScore,
    pub generated_at: DateTime<Utc>,
}

/// Contract and request counts are point-in-time; audit counts cover the window.
async fn gather(state: &AppState, from: DateTime<Utc>, to: DateTime<Utc>) -> ApiResult<ComplianceMetrics> {
    let metrics = sqlx::query_as::<_, ComplianceMetrics>(
        "SELECT \
           (SELECT COUNT(*) FROM consent_contracts WHERE status = 'active') AS active_contracts, \
           (SELECT COUNT(*) FROM consent_contracts WHERE status = 'revoked' \
              AND revoked_at >= $1 AND revoked_at < $2) AS revoked_contracts, \
           (SELECT COUNT(*) FROM consent_contracts WHERE status = 'expired' \
              OR (status = 'active' AND valid_until < NOW())) AS expired_contracts, \
           (SELECT COUNT(*) FROM consent_requests WHERE status = 'pending') AS pending_requests, \
           (SELECT COUNT(*) FROM consent_requests WHERE status = 'pending' \
              AND expires_at < NOW()) AS overdue_requests, \
           (SELECT COUNT(*) FROM consent_requests WHERE status = 'expired' \
              AND updated_at >= $1 AND updated_at < $2) AS expired_requests, \
           (SELECT COUNT(*) FROM audit_logs WHERE created_at >= $1 AND created_at < $2) AS audit_events, \
           (SELECT COUNT(*) FROM audit_logs WHERE status = 'failure' \
              AND created_at >= $1 AND created_at < $2) AS audit_failures, \
           (SELECT COUNT(*) FROM users WHERE is_active \
              AND COALESCE(last_login_at, created_at) < NOW() - INTERVAL '90 days') AS inactive_users, \
           (SELECT COUNT(*) FROM users WHERE is_active) AS active_users",
    )
    .bind(from)
    .bind(to)
    .fetch_one(state.db.pool())
    .await?;
    Ok(metrics)
}

async fn report(state: &AppState, from: DateTime<Utc>, to: DateTime<Utc>) -> ApiResult<ComplianceReport> {
    let metrics = gather(state, from, to).await?;
    Ok(ComplianceReport {
        from,
        to,
        score: score(&metrics),
        metrics,
        generated_at: Utc::now(),
    })
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn overview(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<ComplianceReport>> {
    user.require(Permission::ViewCompliance)?;
    let to = Utc::now();
    let from = to - Duration::days(OVERVIEW_WINDOW_DAYS);
    Ok(ApiResponse::ok(report(&state, from, to).await?))
}

#[instrument(skip_all, fields(user = %user.id, from = %query.from, to = %query.to))]
pub async fn window_report(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<ReportQuery>,
) -> ApiResult<ApiResponse<ComplianceReport>> {
    user.require(Permission::ViewCompliance)?;
    if query.from >= query.to {
        return Err(ApiError::Validation("`from` must be before `to`".into()));
    }
    Ok(ApiResponse::ok(report(&state, query.from, query.to).await?))
}
