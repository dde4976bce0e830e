use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    DocumentType {
        LabReport => "lab_report",
        Imaging => "imaging",
        Referral => "referral",
        DischargeSummary => "discharge_summary",
        ConsentForm => "consent_form",
        Insurance => "insurance",
        Other => "other",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub document_type: DocumentType,
    pub title: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub description: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub const DOCUMENT_COLUMNS: &str = "id, patient_id, document_type, title, file_name, mime_type, \
     file_size, storage_path, description, uploaded_by, is_active, created_at";

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/dicom",
    "text/plain",
];

/// 50 MiB
pub const MAX_FILE_SIZE: i64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub document_type: DocumentType,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    pub mime_type: String,
    #[validate(range(min = 1))]
    pub file_size: i64,
    #[validate(length(min = 1, max = 1024))]
    pub storage_path: String,
    pub description: Option<String>,
}

impl CreateDocumentRequest {
    pub fn mime_allowed(&self) -> bool {
        ALLOWED_MIME_TYPES.contains(&self.mime_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListQuery {
    pub document_type: Option<DocumentType>,
}
