use actix_web::web;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{ensure_patient_read, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::identifiers::RecordKind;
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::appointment::{Appointment, APPOINTMENT_COLUMNS};
use crate::models::insight::{AiInsight, INSIGHT_COLUMNS};
use crate::models::lab::{LabOrder, LAB_ORDER_COLUMNS};
use crate::models::patient::{
    CreatePatientRequest, Patient, PatientListQuery, UpdatePatientRequest, PATIENT_COLUMNS,
};
use crate::models::prescription::{Prescription, PRESCRIPTION_COLUMNS};
use crate::models::visit::{VitalSigns, VITAL_SIGNS_COLUMNS};
use crate::AppState;

/// Everything the chart header needs in one response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(flatten)]
    pub patient: Patient,
    pub age: u32,
    pub latest_vital_signs: Option<VitalSigns>,
    pub upcoming_appointments: Vec<Appointment>,
    pub recent_lab_orders: Vec<LabOrder>,
    pub active_prescriptions: Vec<Prescription>,
    pub open_insights: Vec<AiInsight>,
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_patients(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<PatientListQuery>,
) -> ApiResult<ApiResponse<Vec<Patient>>> {
    user.require(Permission::ReadPatients)?;
    let query = query.into_inner();
    let (patients, meta) = ListQuery::new(PATIENT_COLUMNS, "patients")
        .filter("gender", query.gender)
        .filter("is_active", Some(query.is_active.unwrap_or(true)))
        .search(
            &["hn", "first_name", "last_name", "phone", "national_id"],
            query.search.as_deref(),
        )
        .order_by("created_at DESC")
        .fetch_page::<Patient>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(patients, meta))
}

#[instrument(skip(state, user))]
pub async fn get_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Patient>> {
    let id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, id).await?;
    let patient = fetch_by_id(state.db.pool(), PATIENT_COLUMNS, "patients", id, "Patient").await?;
    Ok(ApiResponse::ok(patient))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn create_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    body: web::Json<CreatePatientRequest>,
) -> ApiResult<ApiResponse<Patient>> {
    let result = register_patient(&state, &user, &meta, body.into_inner()).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "CREATE", "patient")).await
}

async fn register_patient(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    body: CreatePatientRequest,
) -> ApiResult<ApiResponse<Patient>> {
    user.require(Permission::WritePatients)?;
    body.validate()?;

    let mut tx = state.db.transaction().await?;
    let hn = events::next_number(&mut *tx, RecordKind::Patient).await?;
    let sql = format!(
        "INSERT INTO patients (hn, national_id, first_name, last_name, date_of_birth, gender, \
         phone, email, address, blood_type, allergies, chronic_diseases, emergency_contact_name, \
         emergency_contact_phone, user_id, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         RETURNING {}",
        PATIENT_COLUMNS
    );
    let patient: Patient = sqlx::query_as(&sql)
        .bind(&hn)
        .bind(&body.national_id)
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(body.date_of_birth)
        .bind(body.gender)
        .bind(&body.phone)
        .bind(&body.email)
        .bind(&body.address)
        .bind(&body.blood_type)
        .bind(&body.allergies)
        .bind(&body.chronic_diseases)
        .bind(&body.emergency_contact_name)
        .bind(&body.emergency_contact_phone)
        .bind(body.user_id)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            ApiError::on_unique_violation(err, "PATIENT_EXISTS", "a patient with this national id already exists")
        })?;
    tx.commit().await?;

    events::audit(
        state.db.pool(),
        user.audit(meta, "CREATE", "patient")
            .resource(patient.id)
            .details(json!({ "hn": patient.hn })),
    )
    .await;

    Ok(ApiResponse::created(patient))
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn update_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<UpdatePatientRequest>,
) -> ApiResult<ApiResponse<Patient>> {
    let id = path.into_inner();
    let result = write_patient(&state, &user, &meta, id, body.into_inner()).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "UPDATE", "patient").resource(id))
        .await
}

async fn write_patient(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    id: Uuid,
    body: UpdatePatientRequest,
) -> ApiResult<ApiResponse<Patient>> {
    user.require(Permission::WritePatients)?;
    body.validate()?;

    let sql = format!(
        "UPDATE patients SET first_name = COALESCE($2, first_name), \
         last_name = COALESCE($3, last_name), date_of_birth = COALESCE($4, date_of_birth), \
         gender = COALESCE($5, gender), phone = COALESCE($6, phone), email = COALESCE($7, email), \
         address = COALESCE($8, address), blood_type = COALESCE($9, blood_type), \
         allergies = COALESCE($10, allergies), chronic_diseases = COALESCE($11, chronic_diseases), \
         emergency_contact_name = COALESCE($12, emergency_contact_name), \
         emergency_contact_phone = COALESCE($13, emergency_contact_phone), updated_at = NOW() \
         WHERE id = $1 AND is_active RETURNING {}",
        PATIENT_COLUMNS
    );
    let patient: Patient = sqlx::query_as(&sql)
        .bind(id)
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(body.date_of_birth)
        .bind(body.gender)
        .bind(&body.phone)
        .bind(&body.email)
        .bind(&body.address)
        .bind(&body.blood_type)
        .bind(&body.allergies)
        .bind(&body.chronic_diseases)
        .bind(&body.emergency_contact_name)
        .bind(&body.emergency_contact_phone)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Patient"))?;

    events::audit(state.db.pool(), user.audit(meta, "UPDATE", "patient").resource(id)).await;
    Ok(ApiResponse::ok(patient))
}

#[instrument(skip(state, user, meta))]
pub async fn deactivate_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Patient>> {
    let id = path.into_inner();
    let result = retire_patient(&state, &user, &meta, id).await;
    events::audit_outcome(state.db.pool(), result, || user.audit(&meta, "DELETE", "patient").resource(id))
        .await
}

async fn retire_patient(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    id: Uuid,
) -> ApiResult<ApiResponse<Patient>> {
    user.require_admin()?;
    let sql = format!(
        "UPDATE patients SET is_active = FALSE, updated_at = NOW() WHERE id = $1 AND is_active RETURNING {}",
        PATIENT_COLUMNS
    );
    let patient: Patient = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Patient"))?;

    events::audit(state.db.pool(), user.audit(meta, "DELETE", "patient").resource(id)).await;
    Ok(ApiResponse::ok(patient))
}

#[instrument(skip(state, user))]
pub async fn patient_summary(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<PatientSummary>> {
    let id = path.into_inner();
    let pool = state.db.pool();
    ensure_patient_read(pool, &user, id).await?;
    let patient: Patient = fetch_by_id(pool, PATIENT_COLUMNS, "patients", id, "Patient").await?;

    let vitals_sql = format!(
        "SELECT {} FROM vital_signs WHERE patient_id = $1 ORDER BY measured_at DESC LIMIT 1",
        VITAL_SIGNS_COLUMNS
    );
    let appointments_sql = format!(
        "SELECT {} FROM appointments WHERE patient_id = $1 AND appointment_date >= CURRENT_DATE \
         AND status IN ('scheduled', 'confirmed') ORDER BY appointment_date, appointment_time LIMIT 5",
        APPOINTMENT_COLUMNS
    );
    let labs_sql = format!(
        "SELECT {} FROM lab_orders WHERE patient_id = $1 ORDER BY ordered_at DESC LIMIT 5",
        LAB_ORDER_COLUMNS
    );
    let prescriptions_sql = format!(
        "SELECT {} FROM prescriptions WHERE patient_id = $1 AND status IN ('active', 'dispensed') \
         ORDER BY prescribed_at DESC",
        PRESCRIPTION_COLUMNS
    );
    let insights_sql = format!(
        "SELECT {} FROM ai_insights WHERE patient_id = $1 AND status = 'new' ORDER BY created_at DESC",
        INSIGHT_COLUMNS
    );

    let (latest_vital_signs, upcoming_appointments, recent_lab_orders, active_prescriptions, open_insights) =
        futures::try_join!(
            sqlx::query_as::<_, VitalSigns>(&vitals_sql).bind(id).fetch_optional(pool),
            sqlx::query_as::<_, Appointment>(&appointments_sql).bind(id).fetch_all(pool),
            sqlx::query_as::<_, LabOrder>(&labs_sql).bind(id).fetch_all(pool),
            sqlx::query_as::<_, Prescription>(&prescriptions_sql).bind(id).fetch_all(pool),
            sqlx::query_as::<_, AiInsight>(&insights_sql).bind(id).fetch_all(pool),
        )?;

    Ok(ApiResponse::ok(PatientSummary {
        age: patient.age_on(Utc::now().date_naive()),
        patient,
        latest_vital_signs,
        upcoming_appointments,
        recent_lab_orders,
        active_prescriptions,
        open_insights,
    }))
}
