use actix_web::web;
use chrono::NaiveDate;
use serde_json::json;
use sqlx::PgConnection;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{ensure_patient_exists, ensure_patient_read, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::core::scheduling::{find_conflict, Slot};
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::appointment::{
    Appointment, AppointmentListQuery, AppointmentStatus, AppointmentStatusRequest,
    CreateAppointmentRequest, UpdateAppointmentRequest, APPOINTMENT_COLUMNS,
};
use crate::AppState;

/// Physician appointments on `date` and the days either side, so slots
/// crossing midnight are seen too.
async fn physician_calendar(
    conn: &mut PgConnection,
    physician_id: Uuid,
    date: NaiveDate,
) -> ApiResult<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} FROM appointments WHERE physician_id = $1 \
         AND appointment_date BETWEEN $2::date - 1 AND $2::date + 1 \
         AND status IN ('scheduled', 'confirmed', 'completed') FOR UPDATE",
        APPOINTMENT_COLUMNS
    );
    let rows = sqlx::query_as(&sql)
        .bind(physician_id)
        .bind(date)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Serializes bookings per physician until the transaction ends. Row locks
/// alone miss the case where the calendar is still empty.
async fn lock_physician(conn: &mut PgConnection, physician_id: Uuid) -> ApiResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
        .bind(physician_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn ensure_slot_free(
    conn: &mut PgConnection,
    physician_id: Uuid,
    slot: &Slot,
    ignore: Option<Uuid>,
) -> ApiResult<()> {
    lock_physician(&mut *conn, physician_id).await?;
    let calendar = physician_calendar(conn, physician_id, slot.start.date()).await?;
    if let Some(existing) = find_conflict(slot, &calendar, ignore) {
        warn!(physician = %physician_id, conflicting = %existing.id, "appointment slot taken");
        return Err(ApiError::conflict(
            "APPOINTMENT_CONFLICT",
            format!(
                "physician already has an appointment at {} for {} minutes",
                existing.starts_at().format("%Y-%m-%d %H:%M"),
                existing.duration_minutes
            ),
        ));
    }
    Ok(())
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_appointments(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<AppointmentListQuery>,
) -> ApiResult<ApiResponse<Vec<Appointment>>> {
    user.require(Permission::ReadPatients)?;
    let query = query.into_inner();
    let (appointments, meta) = ListQuery::new(APPOINTMENT_COLUMNS, "appointments")
        .filter("appointment_date", query.date)
        .filter_op("appointment_date", ">=", query.from)
        .filter_op("appointment_date", "<=", query.to)
        .filter("physician_id", query.physician_id)
        .filter("patient_id", query.patient_id)
        .filter("status", query.status)
        .order_by("appointment_date, appointment_time")
        .fetch_page::<Appointment>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(appointments, meta))
}

#[instrument(skip(state, user, page))]
pub async fn list_patient_appointments(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
) -> ApiResult<ApiResponse<Vec<Appointment>>> {
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (appointments, meta) = ListQuery::new(APPOINTMENT_COLUMNS, "appointments")
        .filter("patient_id", Some(patient_id))
        .order_by("appointment_date DESC, appointment_time DESC")
        .fetch_page::<Appointment>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(appointments, meta))
}

#[instrument(skip(state, user))]
pub async fn get_appointment(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Appointment>> {
    let appointment: Appointment =
        fetch_by_id(state.db.pool(), APPOINTMENT_COLUMNS, "appointments", path.into_inner(), "Appointment").await?;
    ensure_patient_read(state.db.pool(), &user, appointment.patient_id).await?;
    Ok(ApiResponse::ok(appointment))
}

#[instrument(skip_all, fields(user = %user.id, patient = %path))]
pub async fn create_appointment(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<CreateAppointmentRequest>,
) -> ApiResult<ApiResponse<Appointment>> {
    user.require(Permission::ManageAppointments)?;
    let body = body.into_inner();
    body.validate()?;
    let patient_id = path.into_inner();
    let slot = Slot::new(body.appointment_date, body.appointment_time, body.duration_minutes);

    let mut tx = state.db.transaction().await?;
    ensure_patient_exists(&mut *tx, patient_id).await?;
    ensure_slot_free(&mut tx, body.physician_id, &slot, None).await?;

    let sql = format!(
        "INSERT INTO appointments (patient_id, physician_id, appointment_date, appointment_time, \
         duration_minutes, appointment_type, reason, status, notes, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
        APPOINTMENT_COLUMNS
    );
    let appointment: Appointment = sqlx::query_as(&sql)
        .bind(patient_id)
        .bind(body.physician_id)
        .bind(body.appointment_date)
        .bind(body.appointment_time)
        .bind(body.duration_minutes)
        .bind(&body.appointment_type)
        .bind(&body.reason)
        .bind(AppointmentStatus::Scheduled)
        .bind(&body.notes)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    events::audit(
        state.db.pool(),
        user.audit(&meta, "CREATE", "appointment")
            .resource(appointment.id)
            .details(json!({
                "patientId": patient_id,
                "physicianId": appointment.physician_id,
                "startsAt": appointment.starts_at(),
            })),
    )
    .await;

    Ok(ApiResponse::created(appointment))
}

/// Reschedule or edit. A moved slot is checked for conflicts again.
#[instrument(skip_all, fields(user = %user.id, appointment = %path))]
pub async fn update_appointment(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<UpdateAppointmentRequest>,
) -> ApiResult<ApiResponse<Appointment>> {
    user.require(Permission::ManageAppointments)?;
    let id = path.into_inner();
    let body = body.into_inner();
    body.validate()?;

    let mut tx = state.db.transaction().await?;
    let current: Appointment = fetch_by_id(&mut *tx, APPOINTMENT_COLUMNS, "appointments", id, "Appointment").await?;
    if !matches!(current.status, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed) {
        return Err(ApiError::conflict(
            "INVALID_STATUS_TRANSITION",
            format!("a {} appointment cannot be changed", current.status),
        ));
    }

    let physician_id = body.physician_id.unwrap_or(current.physician_id);
    let date = body.appointment_date.unwrap_or(current.appointment_date);
    let time = body.appointment_time.unwrap_or(current.appointment_time);
    let duration = body.duration_minutes.unwrap_or(current.duration_minutes);
    let moved = physician_id != current.physician_id
        || date != current.appointment_date
        || time != current.appointment_time
        || duration != current.duration_minutes;
    if moved {
        ensure_slot_free(&mut tx, physician_id, &Slot::new(date, time, duration), Some(id)).await?;
    }

    let sql = format!(
        "UPDATE appointments SET physician_id = $2, appointment_date = $3, appointment_time = $4, \
         duration_minutes = $5, appointment_type = COALESCE($6, appointment_type), \
         reason = COALESCE($7, reason), notes = COALESCE($8, notes), updated_at = NOW() \
         WHERE id = $1 RETURNING {}",
        APPOINTMENT_COLUMNS
    );
    let appointment: Appointment = sqlx::query_as(&sql)
        .bind(id)
        .bind(physician_id)
        .bind(date)
        .bind(time)
        .bind(duration)
        .bind(&body.appointment_type)
        .bind(&body.reason)
        .bind(&body.notes)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    events::audit(
        state.db.pool(),
        user.audit(&meta, if moved { "RESCHEDULE" } else { "UPDATE" }, "appointment").resource(id),
    )
    .await;
    Ok(ApiResponse::ok(appointment))
}

async fn transition(
    state: &AppState,
    user: &AuthUser,
    meta: &RequestMeta,
    id: Uuid,
    next: AppointmentStatus,
    notes: Option<String>,
) -> ApiResult<Appointment> {
    let mut tx = state.db.transaction().await?;
    let current: Appointment = fetch_by_id(&mut *tx, APPOINTMENT_COLUMNS, "appointments", id, "Appointment").await?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::conflict(
            "INVALID_STATUS_TRANSITION",
            format!("cannot move appointment from {} to {}", current.status, next),
        ));
    }

    let sql = format!(
        "UPDATE appointments SET status = $2, notes = COALESCE($3, notes), updated_at = NOW() \
         WHERE id = $1 AND status = $4 RETURNING {}",
        APPOINTMENT_COLUMNS
    );
    let appointment: Appointment = sqlx::query_as(&sql)
        .bind(id)
        .bind(next)
        .bind(notes)
        .bind(current.status)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::conflict("INVALID_STATUS_TRANSITION", "appointment changed concurrently"))?;
    tx.commit().await?;

    events::audit(
        state.db.pool(),
        user.audit(meta, "STATUS_CHANGE", "appointment")
            .resource(id)
            .details(json!({ "from": current.status, "to": next })),
    )
    .await;
    Ok(appointment)
}

#[instrument(skip_all, fields(user = %user.id, appointment = %path, status = %body.status))]
pub async fn update_appointment_status(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<AppointmentStatusRequest>,
) -> ApiResult<ApiResponse<Appointment>> {
    user.require(Permission::ManageAppointments)?;
    let body = body.into_inner();
    let appointment = transition(&state, &user, &meta, path.into_inner(), body.status, body.notes).await?;
    Ok(ApiResponse::ok(appointment))
}

#[instrument(skip(state, user, meta))]
pub async fn cancel_appointment(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Appointment>> {
    user.require(Permission::ManageAppointments)?;
    let appointment =
        transition(&state, &user, &meta, path.into_inner(), AppointmentStatus::Cancelled, None).await?;
    Ok(ApiResponse::ok(appointment))
}
