//! Health and database statistics for the admin console.

use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::api::middleware::AuthUser;
use crate::api::response::ApiResponse;
use crate::core::permissions::Permission;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub database: &'static str,
    pub latency_ms: Option<f64>,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub database: String,
    pub size_bytes: i64,
    pub commits: i64,
    pub rollbacks: i64,
    pub blocks_read: i64,
    pub blocks_hit: i64,
    pub cache_hit_ratio: Option<f64>,
    pub deadlocks: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub database: DatabaseStats,
    pub pool: PoolStats,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table_name: String,
    pub live_rows: i64,
    pub dead_rows: i64,
    pub seq_scans: i64,
    pub index_scans: Option<i64>,
    pub total_bytes: i64,
    pub last_autovacuum: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub state: String,
    pub count: i64,
}

async fn check(state: &AppState) -> Health {
    let (database, latency_ms) = match state.db.ping().await {
        Ok(elapsed) => ("connected", Some(elapsed.as_secs_f64() * 1000.0)),
        Err(err) => {
            warn!(error = %err, "health check could not reach the database");
            ("unreachable", None)
        }
    };
    Health {
        status: if latency_ms.is_some() { "healthy" } else { "degraded" },
        database,
        latency_ms,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    }
}

/// Unauthenticated liveness probe; 503 when the database is unreachable.
#[instrument(skip_all)]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let health = check(&state).await;
    let status = if health.latency_ms.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let mut body = ApiResponse::ok(health);
    body.status_code = status.as_u16();
    HttpResponse::build(status).json(body)
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn system_health(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<Health>> {
    user.require(Permission::ViewSystem)?;
    Ok(ApiResponse::ok(check(&state).await))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn system_stats(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<SystemStats>> {
    user.require(Permission::ViewSystem)?;
    let database: DatabaseStats = sqlx::query_as(
        "SELECT datname::text AS database, pg_database_size(datname) AS size_bytes, \
         xact_commit AS commits, xact_rollback AS rollbacks, blks_read AS blocks_read, \
         blks_hit AS blocks_hit, \
         CASE WHEN blks_hit + blks_read = 0 THEN NULL \
              ELSE round(blks_hit::numeric / (blks_hit + blks_read) * 100, 2)::float8 END AS cache_hit_ratio, \
         deadlocks FROM pg_stat_database WHERE datname = current_database()",
    )
    .fetch_one(state.db.pool())
    .await?;

    let pool = state.db.status();
    let now = Utc::now();
    Ok(ApiResponse::ok(SystemStats {
        database,
        pool: PoolStats {
            size: pool.size,
            idle: pool.idle,
            max_connections: pool.max_connections,
        },
        started_at: state.started_at,
        uptime_seconds: (now - state.started_at).num_seconds(),
    }))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn table_stats(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<Vec<TableStats>>> {
    user.require(Permission::ViewSystem)?;
    let tables = sqlx::query_as(
        "SELECT relname::text AS table_name, n_live_tup AS live_rows, n_dead_tup AS dead_rows, \
         seq_scan AS seq_scans, idx_scan AS index_scans, \
         pg_total_relation_size(relid) AS total_bytes, last_autovacuum \
         FROM pg_stat_user_tables ORDER BY n_live_tup DESC",
    )
    .fetch_all(state.db.pool())
    .await?;
    Ok(ApiResponse::ok(tables))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn connection_stats(
    state: web::Data<AppState>,
    user: AuthUser,
) -> ApiResult<ApiResponse<Vec<ConnectionState>>> {
    user.require(Permission::ViewSystem)?;
    let states = sqlx::query_as(
        "SELECT COALESCE(state, 'unknown') AS state, COUNT(*) AS count FROM pg_stat_activity \
         WHERE datname = current_database() GROUP BY 1 ORDER BY count DESC",
    )
    .fetch_all(state.db.pool())
    .await?;
    Ok(ApiResponse::ok(states))
}
