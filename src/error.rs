//! Error type shared by every handler.
//!
//! Each variant carries a stable string code; the HTTP mapping and the
//! envelope rendering live in the `ResponseError` impl.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::api::response::ApiResponse;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database failure reported under an endpoint-specific code.
    #[error("{code}: {source}")]
    QueryFailed {
        code: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::BadRequest { code, .. } => *code,
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict { code, .. } => *code,
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::QueryFailed { code, .. } => *code,
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn query_failed(code: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::QueryFailed { code, source }
    }

    /// Map a unique-constraint violation to a 409, leave everything else alone.
    pub fn on_unique_violation(err: sqlx::Error, code: &'static str, message: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return ApiError::conflict(code, message);
            }
        }
        ApiError::Database(err)
    }

    fn body(&self) -> ErrorBody {
        let message = match self {
            // Internal details stay in the logs.
            ApiError::Database(_) | ApiError::QueryFailed { .. } => {
                "A database error occurred".to_string()
            }
            ApiError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code(),
            message,
            details: None,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reasons: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, reasons.join(", "))
            })
            .collect();
        fields.sort();
        ApiError::Validation(fields.join("; "))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::QueryFailed { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        HttpResponse::build(status).json(ApiResponse::<()>::failure(status, self.body()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;
    use test_case::test_case;

    #[test_case(ApiError::Validation("bad".into()), 400, "VALIDATION_ERROR")]
    #[test_case(ApiError::Unauthorized("no token".into()), 401, "UNAUTHORIZED")]
    #[test_case(ApiError::forbidden("nope"), 403, "FORBIDDEN")]
    #[test_case(ApiError::NotFound("Patient"), 404, "NOT_FOUND")]
    #[test_case(ApiError::conflict("APPOINTMENT_CONFLICT", "taken"), 409, "APPOINTMENT_CONFLICT")]
    #[test_case(ApiError::bad_request("REQUEST_EXPIRED", "late"), 400, "REQUEST_EXPIRED")]
    #[test_case(ApiError::Database(sqlx::Error::RowNotFound), 500, "DATABASE_ERROR")]
    #[test_case(ApiError::query_failed("EXTERNAL_REQUESTERS_ERROR")(sqlx::Error::PoolClosed), 500, "EXTERNAL_REQUESTERS_ERROR")]
    fn maps_status_and_code(err: ApiError, status: u16, code: &str) {
        assert_eq!(err.status_code().as_u16(), status);
        assert_eq!(err.code(), code);
    }

    #[test]
    fn error_response_uses_envelope() {
        let resp = ApiError::NotFound("Patient").error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = resp.into_body().try_into_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["data"].is_null());
        assert_eq!(json["statusCode"], 404);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Patient not found");
    }

    #[test]
    fn database_errors_are_not_leaked() {
        let resp = ApiError::Database(sqlx::Error::PoolTimedOut).error_response();
        let bytes = resp.into_body().try_into_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["message"], "A database error occurred");
    }
}
