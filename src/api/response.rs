//! Response envelope and pagination parameters.

use actix_web::{body::BoxBody, http::StatusCode, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `{ data, meta, error, statusCode }`, the body of every response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub meta: Option<Meta>,
    pub error: Option<ErrorBody>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self::with_status(StatusCode::CREATED, data)
    }

    pub fn paginated(data: T, meta: Meta) -> Self {
        Self {
            meta: Some(meta),
            ..Self::ok(data)
        }
    }

    fn with_status(status: StatusCode, data: T) -> Self {
        Self {
            data: Some(data),
            meta: None,
            error: None,
            status_code: status.as_u16(),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(status: StatusCode, error: ErrorBody) -> Self {
        Self {
            data: None,
            meta: None,
            error: Some(error),
            status_code: status.as_u16(),
        }
    }
}

impl<T: Serialize> Responder for ApiResponse<T> {
    type Body = BoxBody;

    fn respond_to(self, _req: &HttpRequest) -> HttpResponse<Self::Body> {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        HttpResponse::build(status).json(self)
    }
}

/// `page`/`limit` query parameters shared by every list endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page()) - 1) * i64::from(self.limit())
    }

    pub fn meta(&self, total: i64) -> Meta {
        let limit = i64::from(self.limit());
        Meta {
            page: self.page(),
            limit: self.limit(),
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, None, 1, 20, 0 ; "defaults")]
    #[test_case(Some(3), Some(10), 3, 10, 20 ; "third page")]
    #[test_case(Some(0), Some(0), 1, 1, 0 ; "zero clamps up")]
    #[test_case(Some(2), Some(500), 2, 100, 100 ; "limit clamps down")]
    fn page_arithmetic(page: Option<u32>, limit: Option<u32>, p: u32, l: u32, offset: i64) {
        let params = PageParams { page, limit };
        assert_eq!(params.page(), p);
        assert_eq!(params.limit(), l);
        assert_eq!(params.offset(), offset);
    }

    #[test]
    fn total_pages_round_up() {
        let params = PageParams {
            page: Some(1),
            limit: Some(20),
        };
        assert_eq!(params.meta(0).total_pages, 0);
        assert_eq!(params.meta(20).total_pages, 1);
        assert_eq!(params.meta(41).total_pages, 3);
    }

    #[test]
    fn envelope_shape() {
        let params = PageParams::default();
        let body = serde_json::to_value(ApiResponse::paginated(vec![1, 2], params.meta(2))).unwrap();
        assert_eq!(body["data"], serde_json::json!([1, 2]));
        assert_eq!(body["meta"]["totalPages"], 1);
        assert!(body["error"].is_null());
        assert_eq!(body["statusCode"], 200);
    }
}
