use actix_web::web;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::visits::{group_items, insert_prescription};
use super::{ensure_patient_exists, ensure_patient_read, ensure_visit_of_patient, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::prescription::{
    CreatePrescriptionRequest, Prescription, PrescriptionItem, PrescriptionListQuery, PrescriptionStatus,
    PrescriptionStatusRequest, PrescriptionWithItems, PRESCRIPTION_COLUMNS, PRESCRIPTION_ITEM_COLUMNS,
};
use crate::AppState;

async fn with_items(state: &AppState, prescriptions: Vec<Prescription>) -> ApiResult<Vec<PrescriptionWithItems>> {
    if prescriptions.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = prescriptions.iter().map(|p| p.id).collect();
    let sql = format!(
        "SELECT {} FROM prescription_items WHERE prescription_id = ANY($1)",
        PRESCRIPTION_ITEM_COLUMNS
    );
    let items: Vec<PrescriptionItem> = sqlx::query_as(&sql).bind(&ids).fetch_all(state.db.pool()).await?;
    Ok(group_items(prescriptions, items))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_prescriptions(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<PrescriptionListQuery>,
) -> ApiResult<ApiResponse<Vec<PrescriptionWithItems>>> {
    user.require(Permission::ReadPatients)?;
    let query = query.into_inner();
    let (prescriptions, meta) = ListQuery::new(PRESCRIPTION_COLUMNS, "prescriptions")
        .filter("status", query.status)
        .filter("patient_id", query.patient_id)
        .order_by("prescribed_at DESC")
        .fetch_page::<Prescription>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(with_items(&state, prescriptions).await?, meta))
}

#[instrument(skip(state, user, page))]
pub async fn list_patient_prescriptions(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
) -> ApiResult<ApiResponse<Vec<PrescriptionWithItems>>> {
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (prescriptions, meta) = ListQuery::new(PRESCRIPTION_COLUMNS, "prescriptions")
        .filter("patient_id", Some(patient_id))
        .order_by("prescribed_at DESC")
        .fetch_page::<Prescription>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(with_items(&state, prescriptions).await?, meta))
}

#[instrument(skip(state, user))]
pub async fn get_prescription(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<PrescriptionWithItems>> {
    let prescription: Prescription = fetch_by_id(
        state.db.pool(),
        PRESCRIPTION_COLUMNS,
        "prescriptions",
        path.into_inner(),
        "Prescription",
    )
    .await?;
    ensure_patient_read(state.db.pool(), &user, prescription.patient_id).await?;
    let mut grouped = with_items(&state, vec![prescription]).await?;
    grouped.pop().map(ApiResponse::ok).ok_or(ApiError::NotFound("Prescription"))
}

#[instrument(skip_all, fields(user = %user.id, patient = %path))]
pub async fn create_prescription(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<CreatePrescriptionRequest>,
) -> ApiResult<ApiResponse<PrescriptionWithItems>> {
    user.require(Permission::Prescribe)?;
    let body = body.into_inner();
    body.validate()?;
    let patient_id = path.into_inner();

    let mut tx = state.db.transaction().await?;
    ensure_patient_exists(&mut *tx, patient_id).await?;
    ensure_visit_of_patient(&mut *tx, body.visit_id, patient_id).await?;
    let created = insert_prescription(&mut tx, patient_id, body.visit_id, &body.prescription, user.id).await?;
    tx.commit().await?;

    let medications: Vec<&str> = created.items.iter().map(|i| i.medication_name.as_str()).collect();
    events::audit(
        state.db.pool(),
        user.audit(&meta, "CREATE", "prescription")
            .resource(created.prescription.id)
            .details(json!({
                "prescriptionNumber": created.prescription.prescription_number,
                "medications": medications,
            })),
    )
    .await;

    Ok(ApiResponse::created(created))
}

#[instrument(skip_all, fields(user = %user.id, prescription = %path, status = %body.status))]
pub async fn update_prescription_status(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<PrescriptionStatusRequest>,
) -> ApiResult<ApiResponse<Prescription>> {
    let next = body.status;
    match next {
        PrescriptionStatus::Dispensed | PrescriptionStatus::Completed => {
            user.require(Permission::DispenseMedication)?
        }
        _ => user.require(Permission::Prescribe)?,
    }
    let id = path.into_inner();

    let current: Prescription =
        fetch_by_id(state.db.pool(), PRESCRIPTION_COLUMNS, "prescriptions", id, "Prescription").await?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::conflict(
            "INVALID_STATUS_TRANSITION",
            format!("cannot move prescription from {} to {}", current.status, next),
        ));
    }

    let sql = format!(
        "UPDATE prescriptions SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3 RETURNING {}",
        PRESCRIPTION_COLUMNS
    );
    let prescription: Prescription = sqlx::query_as(&sql)
        .bind(id)
        .bind(next)
        .bind(current.status)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or_else(|| ApiError::conflict("INVALID_STATUS_TRANSITION", "prescription changed concurrently"))?;

    events::audit(
        state.db.pool(),
        user.audit(&meta, "STATUS_CHANGE", "prescription")
            .resource(id)
            .details(json!({ "from": current.status, "to": next })),
    )
    .await;
    Ok(ApiResponse::ok(prescription))
}
