use actix_web::web;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::notification::{
    CreateNotificationRequest, NewNotification, Notification, NotificationListQuery, NOTIFICATION_COLUMNS,
};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Updated {
    pub updated: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivered {
    pub delivered: u64,
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_notifications(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<NotificationListQuery>,
) -> ApiResult<ApiResponse<Vec<Notification>>> {
    let mut list = ListQuery::new(NOTIFICATION_COLUMNS, "notifications")
        .filter("user_id", Some(user.id))
        .order_by("created_at DESC");
    if query.unread_only {
        list = list.where_sql("NOT is_read");
    }
    let (notifications, meta) = list.fetch_page::<Notification>(state.db.pool(), &page).await?;
    Ok(ApiResponse::paginated(notifications, meta))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn unread_count(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<UnreadCount>> {
    let unread: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
            .bind(user.id)
            .fetch_one(state.db.pool())
            .await?;
    Ok(ApiResponse::ok(UnreadCount { unread }))
}

#[instrument(skip(state, user))]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Notification>> {
    let sql = format!(
        "UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, NOW()) \
         WHERE id = $1 AND user_id = $2 RETURNING {}",
        NOTIFICATION_COLUMNS
    );
    let notification: Notification = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .bind(user.id)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Notification"))?;
    Ok(ApiResponse::ok(notification))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn mark_all_read(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<Updated>> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = $1 AND NOT is_read",
    )
    .bind(user.id)
    .execute(state.db.pool())
    .await?;
    Ok(ApiResponse::ok(Updated {
        updated: result.rows_affected(),
    }))
}

#[instrument(skip(state, user))]
pub async fn delete_notification(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Updated>> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(path.into_inner())
        .bind(user.id)
        .execute(state.db.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(ApiResponse::ok(Updated {
        updated: result.rows_affected(),
    }))
}

/// Send to one user, or fan out to every active user of a role.
#[instrument(skip_all, fields(user = %user.id))]
pub async fn create_notification(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    body: web::Json<CreateNotificationRequest>,
) -> ApiResult<ApiResponse<Delivered>> {
    user.require(Permission::SendNotifications)?;
    let body = body.into_inner();
    body.validate()?;

    let notification = NewNotification {
        title: body.title,
        message: body.message,
        notification_type: "system",
        priority: body.priority,
        related_entity_type: None,
        related_entity_id: None,
    };

    let delivered = match (body.user_id, body.role) {
        (Some(recipient), None) => {
            events::notify(state.db.pool(), recipient, &notification)
                .await
                .map_err(|err| match err {
                    sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                        ApiError::NotFound("User")
                    }
                    other => other.into(),
                })?;
            1
        }
        (None, Some(role)) => {
            let mut tx = state.db.transaction().await?;
            let n = events::notify_role(&mut *tx, role, &notification).await?;
            tx.commit().await?;
            info!(%role, delivered = n, "notification fanned out");
            n
        }
        _ => {
            return Err(ApiError::Validation(
                "exactly one of userId and role must be given".into(),
            ))
        }
    };

    events::audit(
        state.db.pool(),
        user.audit(&meta, "SEND", "notification")
            .details(json!({ "userId": body.user_id, "role": body.role, "delivered": delivered })),
    )
    .await;
    Ok(ApiResponse::created(Delivered { delivered }))
}
