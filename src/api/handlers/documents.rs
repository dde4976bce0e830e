//! Document metadata. File bytes live in external storage; rows point at them.

use actix_web::web;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{ensure_patient_exists, ensure_patient_read, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::document::{
    CreateDocumentRequest, Document, DocumentListQuery, ALLOWED_MIME_TYPES, DOCUMENT_COLUMNS, MAX_FILE_SIZE,
};
use crate::AppState;

fn check_file(body: &CreateDocumentRequest) -> ApiResult<()> {
    if !body.mime_allowed() {
        return Err(ApiError::bad_request(
            "UNSUPPORTED_FILE_TYPE",
            format!(
                "mime type '{}' is not accepted; allowed: {}",
                body.mime_type,
                ALLOWED_MIME_TYPES.join(", ")
            ),
        ));
    }
    if body.file_size > MAX_FILE_SIZE {
        return Err(ApiError::bad_request(
            "FILE_TOO_LARGE",
            format!("file exceeds the {} MiB limit", MAX_FILE_SIZE / (1024 * 1024)),
        ));
    }
    Ok(())
}

#[instrument(skip(state, user, page, query))]
pub async fn list_patient_documents(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
    query: web::Query<DocumentListQuery>,
) -> ApiResult<ApiResponse<Vec<Document>>> {
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (documents, meta) = ListQuery::new(DOCUMENT_COLUMNS, "documents")
        .filter("patient_id", Some(patient_id))
        .filter("document_type", query.document_type)
        .where_sql("is_active")
        .order_by("created_at DESC")
        .fetch_page::<Document>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(documents, meta))
}

#[instrument(skip(state, user))]
pub async fn get_document(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Document>> {
    let document: Document =
        fetch_by_id(state.db.pool(), DOCUMENT_COLUMNS, "documents", path.into_inner(), "Document").await?;
    if !document.is_active {
        return Err(ApiError::NotFound("Document"));
    }
    ensure_patient_read(state.db.pool(), &user, document.patient_id).await?;
    Ok(ApiResponse::ok(document))
}

#[instrument(skip_all, fields(user = %user.id, patient = %path))]
pub async fn create_document(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<CreateDocumentRequest>,
) -> ApiResult<ApiResponse<Document>> {
    user.require(Permission::UploadDocuments)?;
    let body = body.into_inner();
    body.validate()?;
    check_file(&body)?;
    let patient_id = path.into_inner();
    ensure_patient_exists(state.db.pool(), patient_id).await?;

    let sql = format!(
        "INSERT INTO documents (patient_id, document_type, title, file_name, mime_type, file_size, \
         storage_path, description, uploaded_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {}",
        DOCUMENT_COLUMNS
    );
    let document: Document = sqlx::query_as(&sql)
        .bind(patient_id)
        .bind(body.document_type)
        .bind(&body.title)
        .bind(&body.file_name)
        .bind(&body.mime_type)
        .bind(body.file_size)
        .bind(&body.storage_path)
        .bind(&body.description)
        .bind(user.id)
        .fetch_one(state.db.pool())
        .await?;

    events::audit(
        state.db.pool(),
        user.audit(&meta, "CREATE", "document")
            .resource(document.id)
            .details(json!({ "patientId": patient_id, "type": document.document_type, "fileName": document.file_name })),
    )
    .await;
    Ok(ApiResponse::created(document))
}

#[instrument(skip(state, user, meta))]
pub async fn delete_document(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Document>> {
    user.require(Permission::UploadDocuments)?;
    let id = path.into_inner();
    let sql = format!(
        "UPDATE documents SET is_active = FALSE WHERE id = $1 AND is_active RETURNING {}",
        DOCUMENT_COLUMNS
    );
    let document: Document = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Document"))?;

    events::audit(state.db.pool(), user.audit(&meta, "DELETE", "document").resource(id)).await;
    Ok(ApiResponse::ok(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::DocumentType;
    use test_case::test_case;

    fn request(mime: &str, size: i64) -> CreateDocumentRequest {
        CreateDocumentRequest {
            document_type: DocumentType::LabReport,
            title: "CBC".into(),
            file_name: "cbc.pdf".into(),
            mime_type: mime.into(),
            file_size: size,
            storage_path: "s3://bucket/cbc.pdf".into(),
            description: None,
        }
    }

    #[test_case("application/pdf", 1024, None)]
    #[test_case("application/x-msdownload", 1024, Some("UNSUPPORTED_FILE_TYPE"))]
    #[test_case("image/png", MAX_FILE_SIZE + 1, Some("FILE_TOO_LARGE"))]
    #[test_case("image/png", MAX_FILE_SIZE, None)]
    fn file_checks(mime: &str, size: i64, code: Option<&str>) {
        assert_eq!(check_file(&request(mime, size)).err().map(|e| e.code()), code);
    }
}
