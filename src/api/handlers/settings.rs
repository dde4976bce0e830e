use actix_web::web;
use serde_json::json;
use tracing::{info, instrument};
use validator::Validate;

use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::ApiResponse;
use crate::core::permissions::{role_has, Permission};
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::setting::{valid_key, SettingListQuery, SystemSetting, UpsertSettingRequest, SETTING_COLUMNS};
use crate::AppState;

const DEFAULT_CATEGORY: &str = "general";

fn checked_key(key: &str) -> ApiResult<&str> {
    if valid_key(key) {
        Ok(key)
    } else {
        Err(ApiError::Validation(format!("invalid setting key '{}'", key)))
    }
}

/// Callers without `ManageSettings` only see public settings.
#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_settings(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<SettingListQuery>,
) -> ApiResult<ApiResponse<Vec<SystemSetting>>> {
    let mut list = ListQuery::new(SETTING_COLUMNS, "system_settings")
        .filter("category", query.into_inner().category)
        .order_by("category, key");
    if !role_has(user.role, Permission::ManageSettings) {
        list = list.where_sql("is_public");
    }
    Ok(ApiResponse::ok(list.fetch_all::<SystemSetting>(state.db.pool()).await?))
}

#[instrument(skip_all)]
pub async fn list_public_settings(state: web::Data<AppState>) -> ApiResult<ApiResponse<Vec<SystemSetting>>> {
    let settings = ListQuery::new(SETTING_COLUMNS, "system_settings")
        .where_sql("is_public")
        .order_by("category, key")
        .fetch_all::<SystemSetting>(state.db.pool())
        .await?;
    Ok(ApiResponse::ok(settings))
}

#[instrument(skip(state, user))]
pub async fn get_setting(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<ApiResponse<SystemSetting>> {
    let key = checked_key(&path)?;
    let sql = format!("SELECT {} FROM system_settings WHERE key = $1", SETTING_COLUMNS);
    let setting: SystemSetting = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(state.db.pool())
        .await?
        .filter(|s: &SystemSetting| s.is_public || role_has(user.role, Permission::ManageSettings))
        .ok_or(ApiError::NotFound("Setting"))?;
    Ok(ApiResponse::ok(setting))
}

/// Insert or replace a setting. Omitted metadata keeps its stored value.
#[instrument(skip(state, user, meta, body))]
pub async fn upsert_setting(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<String>,
    body: web::Json<UpsertSettingRequest>,
) -> ApiResult<ApiResponse<SystemSetting>> {
    user.require(Permission::ManageSettings)?;
    let key = checked_key(&path)?;
    body.validate()?;
    let body = body.into_inner();

    let sql = format!(
        "INSERT INTO system_settings (key, value, category, description, is_public, updated_by, updated_at) \
         VALUES ($1, $2, COALESCE($3, '{default}'), $4, COALESCE($5, FALSE), $6, NOW()) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
           category = COALESCE($3, system_settings.category), \
           description = COALESCE($4, system_settings.description), \
           is_public = COALESCE($5, system_settings.is_public), \
           updated_by = EXCLUDED.updated_by, updated_at = NOW() \
         RETURNING {columns}",
        default = DEFAULT_CATEGORY,
        columns = SETTING_COLUMNS
    );
    let setting: SystemSetting = sqlx::query_as(&sql)
        .bind(key)
        .bind(&body.value)
        .bind(&body.category)
        .bind(&body.description)
        .bind(body.is_public)
        .bind(user.id)
        .fetch_one(state.db.pool())
        .await?;
    info!(key, "setting saved");

    events::audit(
        state.db.pool(),
        user.audit(&meta, "UPDATE", "system_setting")
            .resource(key)
            .details(json!({ "value": setting.value })),
    )
    .await;
    Ok(ApiResponse::ok(setting))
}

#[instrument(skip(state, user, meta))]
pub async fn delete_setting(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<String>,
) -> ApiResult<ApiResponse<SystemSetting>> {
    user.require(Permission::ManageSettings)?;
    let key = checked_key(&path)?;
    let sql = format!("DELETE FROM system_settings WHERE key = $1 RETURNING {}", SETTING_COLUMNS);
    let setting: SystemSetting = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Setting"))?;

    events::audit(state.db.pool(), user.audit(&meta, "DELETE", "system_setting").resource(key)).await;
    Ok(ApiResponse::ok(setting))
}

#[cfg(test)]
mod tests {
    use super::checked_key;

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(checked_key("hospital.name").ok(), Some("hospital.name"));
        assert!(matches!(
            checked_key("Hospital Name"),
            Err(crate::error::ApiError::Validation(_))
        ));
    }
}
