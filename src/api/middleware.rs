//! Request extractors: bearer-token identity, client metadata, and the
//! extractor configs that turn malformed input into `VALIDATION_ERROR`.

use actix_web::dev::Payload;
use actix_web::{error::JsonPayloadError, http::header, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::permissions::{role_has, Permission};
use crate::db::events::AuditEntry;
use crate::error::{ApiError, ApiResult};
use crate::models::user::Role;
use crate::AppState;

const MAX_JSON_BYTES: usize = 2 * 1024 * 1024;

/// Bearer token claims. Tokens are issued by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub username: String,
    pub exp: usize,
}

impl Claims {
    pub fn new(sub: Uuid, role: Role, username: impl Into<String>, ttl: Duration) -> Self {
        Self {
            sub,
            role,
            username: username.into(),
            exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        }
    }

    pub fn encode(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), self, &EncodingKey::from_secret(secret.as_bytes()))
    }

    pub fn decode(token: &str, secret: &str, leeway_secs: u64) -> Result<Self, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map(|data| data.claims)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub username: String,
}

impl AuthUser {
    pub fn require(&self, permission: Permission) -> ApiResult<()> {
        if role_has(self.role, permission) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "role '{}' lacks permission '{}'",
                self.role,
                permission.name()
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("administrator access required"))
        }
    }

    /// An audit row attributed to this caller.
    pub fn audit(&self, meta: &RequestMeta, action: &'static str, resource_type: &'static str) -> AuditEntry {
        let mut entry = AuditEntry::new(action, resource_type);
        entry.user_id = Some(self.id);
        entry.ip_address = meta.ip.clone();
        entry.user_agent = meta.user_agent.clone();
        entry
    }

    fn from_request_sync(req: &HttpRequest) -> ApiResult<Self> {
        let state = req
            .app_data::<web::Data<AppState>>()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("application state missing")))?;

        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

        let auth = &state.config.auth;
        let claims = Claims::decode(token, &auth.jwt_secret, auth.leeway_secs).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            ApiError::Unauthorized("invalid or expired token".into())
        })?;

        Ok(Self {
            id: claims.sub,
            role: claims.role,
            username: claims.username,
        })
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Self::from_request_sync(req))
    }
}

/// Client address and user agent, recorded in audit rows.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl FromRequest for RequestMeta {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let ip = req.connection_info().realip_remote_addr().map(str::to_string);
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        ready(Ok(Self { ip, user_agent }))
    }
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| {
            let message = match &err {
                JsonPayloadError::Deserialize(e) => format!("invalid request body: {}", e),
                other => other.to_string(),
            };
            ApiError::Validation(message).into()
        })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::Validation(format!("invalid query string: {}", err)).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::Validation(format!("invalid path parameter: {}", err)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let id = Uuid::new_v4();
        let token = Claims::new(id, Role::Nurse, "nurse.joy", Duration::hours(1))
            .encode("secret")
            .unwrap();
        let claims = Claims::decode(&token, "secret", 0).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Nurse);
    }

    #[test]
    fn wrong_secret_and_expired_tokens_fail() {
        let token = Claims::new(Uuid::new_v4(), Role::Admin, "root", Duration::hours(1))
            .encode("secret")
            .unwrap();
        assert!(Claims::decode(&token, "other", 0).is_err());

        let stale = Claims::new(Uuid::new_v4(), Role::Admin, "root", Duration::hours(-2))
            .encode("secret")
            .unwrap();
        assert!(Claims::decode(&stale, "secret", 30).is_err());
    }

    #[test]
    fn permission_check_maps_to_forbidden() {
        let user = AuthUser {
            id: Uuid::nil(),
            role: Role::Nurse,
            username: "n".into(),
        };
        assert!(user.require(Permission::ReadPatients).is_ok());
        let err = user.require(Permission::Prescribe).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert!(user.require_admin().is_err());
    }
}
