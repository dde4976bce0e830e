use actix_web::web;
use tracing::instrument;
use uuid::Uuid;

use crate::api::middleware::AuthUser;
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::audit::{
    ActionCount, AuditLog, AuditLogListQuery, AuditStats, AuditStatsQuery, DailyCount, AUDIT_LOG_COLUMNS,
};
use crate::AppState;

const AUDIT_FROM: &str = "audit_logs a LEFT JOIN users u ON u.id = a.user_id";
const DEFAULT_STATS_DAYS: i64 = 7;
const MAX_STATS_DAYS: i64 = 90;

fn stats_window(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_STATS_DAYS).clamp(1, MAX_STATS_DAYS)
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_audit_logs(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<AuditLogListQuery>,
) -> ApiResult<ApiResponse<Vec<AuditLog>>> {
    user.require(Permission::ViewAuditLogs)?;
    let query = query.into_inner();
    let (logs, meta) = ListQuery::new(AUDIT_LOG_COLUMNS, AUDIT_FROM)
        .filter("a.user_id", query.user_id)
        .filter("a.action", query.action)
        .filter("a.resource_type", query.resource_type)
        .filter("a.status", query.status)
        .filter_op("a.created_at", ">=", query.from)
        .filter_op("a.created_at", "<", query.to)
        .order_by("a.created_at DESC")
        .fetch_page::<AuditLog>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(logs, meta))
}

#[instrument(skip(state, user))]
pub async fn get_audit_log(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<AuditLog>> {
    user.require(Permission::ViewAuditLogs)?;
    let sql = format!("SELECT {} FROM {} WHERE a.id = $1", AUDIT_LOG_COLUMNS, AUDIT_FROM);
    let log: AuditLog = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Audit log"))?;
    Ok(ApiResponse::ok(log))
}

/// Counts by action and by day over the last `days` days.
#[instrument(skip_all, fields(user = %user.id))]
pub async fn audit_stats(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<AuditStatsQuery>,
) -> ApiResult<ApiResponse<AuditStats>> {
    user.require(Permission::ViewAuditLogs)?;
    let days = stats_window(query.days);
    let pool = state.db.pool();

    let totals = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'failure') FROM audit_logs \
         WHERE created_at >= NOW() - make_interval(days => $1::int)",
    )
    .bind(days)
    .fetch_one(pool);
    let by_action = sqlx::query_as::<_, ActionCount>(
        "SELECT action, COUNT(*) AS count FROM audit_logs \
         WHERE created_at >= NOW() - make_interval(days => $1::int) \
         GROUP BY action ORDER BY count DESC, action",
    )
    .bind(days)
    .fetch_all(pool);
    let by_day = sqlx::query_as::<_, DailyCount>(
        "SELECT created_at::date AS day, COUNT(*) AS total, \
         COUNT(*) FILTER (WHERE status = 'failure') AS failures FROM audit_logs \
         WHERE created_at >= NOW() - make_interval(days => $1::int) \
         GROUP BY day ORDER BY day",
    )
    .bind(days)
    .fetch_all(pool);

    let ((total, failures), by_action, by_day) = futures::try_join!(totals, by_action, by_day)?;
    Ok(ApiResponse::ok(AuditStats {
        days,
        total,
        failures,
        by_action,
        by_day,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, 7)]
    #[test_case(Some(30), 30)]
    #[test_case(Some(0), 1)]
    #[test_case(Some(365), 90)]
    fn window_is_clamped(days: Option<i64>, expected: i64) {
        assert_eq!(stats_window(days), expected);
    }
}
