use actix_web::web;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::fetch_by_id;
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::user::{CreateUserRequest, Role, UpdateUserRequest, User, UserListQuery, USER_COLUMNS};
use crate::AppState;

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", err)))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_users(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<UserListQuery>,
) -> ApiResult<ApiResponse<Vec<User>>> {
    user.require(Permission::ManageUsers)?;
    let query = query.into_inner();
    let (users, meta) = ListQuery::new(USER_COLUMNS, "users")
        .filter("role", query.role)
        .filter("is_active", query.is_active)
        .search(
            &["username", "email", "first_name", "last_name"],
            query.search.as_deref(),
        )
        .order_by("created_at DESC")
        .fetch_page::<User>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(users, meta))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn current_user(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<User>> {
    let me = fetch_by_id(state.db.pool(), USER_COLUMNS, "users", user.id, "User").await?;
    Ok(ApiResponse::ok(me))
}

#[instrument(skip(state, user))]
pub async fn get_user(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<User>> {
    let id = path.into_inner();
    if id != user.id {
        user.require(Permission::ManageUsers)?;
    }
    let found = fetch_by_id(state.db.pool(), USER_COLUMNS, "users", id, "User").await?;
    Ok(ApiResponse::ok(found))
}

#[instrument(skip_all, fields(user = %user.id, username = %body.username))]
pub async fn create_user(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    body: web::Json<CreateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let result = insert_user(&state, &user, &meta, body.into_inner()).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "CREATE", "user")).await
}

async fn insert_user(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    body: CreateUserRequest,
) -> ApiResult<ApiResponse<User>> {
    user.require(Permission::ManageUsers)?;
    body.validate()?;

    let password_hash = hash_password(&body.password)?;
    let sql = format!(
        "INSERT INTO users (username, email, password_hash, first_name, last_name, role, \
         department, phone, organization) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {}",
        USER_COLUMNS
    );
    let created: User = sqlx::query_as(&sql)
        .bind(body.username.trim())
        .bind(body.email.trim().to_lowercase())
        .bind(&password_hash)
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(body.role)
        .bind(&body.department)
        .bind(&body.phone)
        .bind(&body.organization)
        .fetch_one(state.db.pool())
        .await
        .map_err(|err| ApiError::on_unique_violation(err, "USER_EXISTS", "username or email already registered"))?;

    events::audit(
        state.db.pool(),
        user.audit(meta, "CREATE", "user")
            .resource(created.id)
            .details(json!({ "username": created.username, "role": created.role })),
    )
    .await;

    Ok(ApiResponse::created(created))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn update_user(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<UpdateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let id = path.into_inner();
    let result = write_user(&state, &user, &meta, id, body.into_inner()).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "UPDATE", "user").resource(id))
        .await
}

async fn write_user(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    id: Uuid,
    body: UpdateUserRequest,
) -> ApiResult<ApiResponse<User>> {
    body.validate()?;

    // Users may edit their own profile but not their role or status.
    let self_service = id == user.id && body.role.is_none() && body.is_active.is_none();
    if !self_service {
        user.require(Permission::ManageUsers)?;
    }
    if id == user.id && body.is_active == Some(false) {
        return Err(ApiError::bad_request("CANNOT_DEACTIVATE_SELF", "you cannot deactivate your own account"));
    }

    let sql = format!(
        "UPDATE users SET email = COALESCE($2, email), first_name = COALESCE($3, first_name), \
         last_name = COALESCE($4, last_name), role = COALESCE($5, role), \
         department = COALESCE($6, department), phone = COALESCE($7, phone), \
         organization = COALESCE($8, organization), is_active = COALESCE($9, is_active), \
         updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    );
    let updated: User = sqlx::query_as(&sql)
        .bind(id)
        .bind(body.email.map(|e| e.trim().to_lowercase()))
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(body.role)
        .bind(&body.department)
        .bind(&body.phone)
        .bind(&body.organization)
        .bind(body.is_active)
        .fetch_optional(state.db.pool())
        .await
        .map_err(|err| ApiError::on_unique_violation(err, "USER_EXISTS", "email already registered"))?
        .ok_or(ApiError::NotFound("User"))?;

    events::audit(
        state.db.pool(),
        user.audit(meta, "UPDATE", "user")
            .resource(id)
            .details(json!({ "role": body.role, "isActive": body.is_active })),
    )
    .await;

    Ok(ApiResponse::ok(updated))
}

/// Soft delete: the account is deactivated, never removed.
#[instrument(skip(state, user, meta))]
pub async fn deactivate_user(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<User>> {
    let id = path.into_inner();
    let result = disable_user(&state, &user, &meta, id).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "DEACTIVATE", "user").resource(id))
        .await
}

async fn disable_user(state: &AppState, user: &AuthUser, meta: &RequestMeta, id: Uuid) -> ApiResult<ApiResponse<User>> {
    user.require(Permission::ManageUsers)?;
    if id == user.id {
        return Err(ApiError::bad_request("CANNOT_DEACTIVATE_SELF", "you cannot deactivate your own account"));
    }

    let sql = format!(
        "UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    );
    let updated: User = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    events::audit(state.db.pool(), user.audit(meta, "DEACTIVATE", "user").resource(id)).await;
    Ok(ApiResponse::ok(updated))
}

/// Active accounts that may file consent requests.
#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_external_requesters(
    state: web::Data<AppState>,
    user: AuthUser,
) -> ApiResult<ApiResponse<Vec<User>>> {
    user.require(Permission::ManageConsent)?;
    let requesters = ListQuery::new(USER_COLUMNS, "users")
        .filter("role", Some(Role::ExternalUser))
        .where_sql("is_active")
        .order_by("organization NULLS LAST, last_name, first_name")
        .fetch_all::<User>(state.db.pool())
        .await
        .map_err(ApiError::query_failed("EXTERNAL_REQUESTERS_ERROR"))?;
    Ok(ApiResponse::ok(requesters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    use fake::faker::internet::en::Password;
    use fake::Fake;

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let password: String = Password(12..20).fake();
        let first = hash_password(&password).unwrap();
        let second = hash_password(&password).unwrap();
        assert_ne!(first, second);

        let parsed = PasswordHash::new(&first).unwrap();
        assert!(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"not-it", &parsed).is_err());
    }
}
