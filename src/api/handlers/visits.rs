//! Visits. Creation writes the visit and everything recorded with it in a
//! single transaction.

use actix_web::web;
use serde_json::json;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::{ensure_patient_exists, ensure_patient_read, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::data::with_derived_bmi;
use crate::core::identifiers::RecordKind;
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::lab::{LabOrder, NewLabOrder, LAB_ORDER_COLUMNS};
use crate::models::prescription::{
    NewPrescription, Prescription, PrescriptionItem, PrescriptionWithItems, PRESCRIPTION_COLUMNS,
    PRESCRIPTION_ITEM_COLUMNS,
};
use crate::models::visit::{
    CreateVisitRequest, NewVitalSigns, UpdateVisitRequest, Visit, VisitDetail, VisitStatus, VitalSigns,
    VISIT_COLUMNS, VITAL_SIGNS_COLUMNS,
};
use crate::AppState;

#[instrument(skip(state, user, page))]
pub async fn list_patient_visits(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
) -> ApiResult<ApiResponse<Vec<Visit>>> {
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (visits, meta) = ListQuery::new(VISIT_COLUMNS, "visits")
        .filter("patient_id", Some(patient_id))
        .order_by("visit_date DESC")
        .fetch_page::<Visit>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(visits, meta))
}

#[instrument(skip(state, user))]
pub async fn get_visit(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<VisitDetail>> {
    let pool = state.db.pool();
    let visit: Visit = fetch_by_id(pool, VISIT_COLUMNS, "visits", path.into_inner(), "Visit").await?;
    ensure_patient_read(pool, &user, visit.patient_id).await?;

    let vitals_sql = format!(
        "SELECT {} FROM vital_signs WHERE visit_id = $1 ORDER BY measured_at",
        VITAL_SIGNS_COLUMNS
    );
    let labs_sql = format!(
        "SELECT {} FROM lab_orders WHERE visit_id = $1 ORDER BY ordered_at",
        LAB_ORDER_COLUMNS
    );
    let rx_sql = format!(
        "SELECT {} FROM prescriptions WHERE visit_id = $1 ORDER BY prescribed_at",
        PRESCRIPTION_COLUMNS
    );
    let items_sql = format!(
        "SELECT {} FROM prescription_items WHERE prescription_id IN \
         (SELECT id FROM prescriptions WHERE visit_id = $1)",
        PRESCRIPTION_ITEM_COLUMNS
    );

    let (vital_signs, lab_orders, prescriptions, items) = futures::try_join!(
        sqlx::query_as::<_, VitalSigns>(&vitals_sql).bind(visit.id).fetch_all(pool),
        sqlx::query_as::<_, LabOrder>(&labs_sql).bind(visit.id).fetch_all(pool),
        sqlx::query_as::<_, Prescription>(&rx_sql).bind(visit.id).fetch_all(pool),
        sqlx::query_as::<_, PrescriptionItem>(&items_sql).bind(visit.id).fetch_all(pool),
    )?;

    Ok(ApiResponse::ok(VisitDetail {
        visit,
        vital_signs,
        lab_orders,
        prescriptions: group_items(prescriptions, items),
    }))
}

pub(crate) fn group_items(prescriptions: Vec<Prescription>, mut items: Vec<PrescriptionItem>) -> Vec<PrescriptionWithItems> {
    prescriptions
        .into_iter()
        .map(|prescription| {
            let (mine, rest): (Vec<_>, Vec<_>) =
                items.drain(..).partition(|item| item.prescription_id == prescription.id);
            items = rest;
            PrescriptionWithItems {
                prescription,
                items: mine,
            }
        })
        .collect()
}

#[instrument(skip_all, fields(user = %user.id, patient = %path))]
pub async fn create_visit(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<CreateVisitRequest>,
) -> ApiResult<ApiResponse<VisitDetail>> {
    user.require(Permission::WritePatients)?;
    let body = body.into_inner();
    body.validate()?;
    if !body.lab_orders.is_empty() {
        user.require(Permission::OrderLabs)?;
    }
    if !body.prescriptions.is_empty() {
        user.require(Permission::Prescribe)?;
    }
    let patient_id = path.into_inner();

    let mut tx = state.db.transaction().await?;
    ensure_patient_exists(&mut *tx, patient_id).await?;

    let visit_number = events::next_number(&mut *tx, RecordKind::Visit).await?;
    let sql = format!(
        "INSERT INTO visits (visit_number, patient_id, doctor_id, visit_type, status, chief_complaint, \
         diagnosis, treatment_plan, notes, visit_date, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, NOW()), $11) RETURNING {}",
        VISIT_COLUMNS
    );
    let visit: Visit = sqlx::query_as(&sql)
        .bind(&visit_number)
        .bind(patient_id)
        .bind(body.doctor_id.or(Some(user.id)))
        .bind(body.visit_type)
        .bind(VisitStatus::InProgress)
        .bind(&body.chief_complaint)
        .bind(&body.diagnosis)
        .bind(&body.treatment_plan)
        .bind(&body.notes)
        .bind(body.visit_date)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

    let mut vital_signs = Vec::new();
    if let Some(vitals) = &body.vital_signs {
        vital_signs.push(insert_vital_signs(&mut tx, &visit, vitals, user.id).await?);
    }

    let mut lab_orders = Vec::with_capacity(body.lab_orders.len());
    for order in &body.lab_orders {
        lab_orders.push(insert_lab_order(&mut tx, patient_id, Some(visit.id), order, user.id).await?);
    }

    let mut prescriptions = Vec::with_capacity(body.prescriptions.len());
    for prescription in &body.prescriptions {
        prescriptions.push(insert_prescription(&mut tx, patient_id, Some(visit.id), prescription, user.id).await?);
    }

    tx.commit().await?;
    info!(visit = %visit.visit_number, labs = lab_orders.len(), prescriptions = prescriptions.len(), "visit created");

    events::audit(
        state.db.pool(),
        user.audit(&meta, "CREATE", "visit")
            .resource(visit.id)
            .details(json!({ "visitNumber": visit.visit_number, "patientId": patient_id })),
    )
    .await;

    Ok(ApiResponse::created(VisitDetail {
        visit,
        vital_signs,
        lab_orders,
        prescriptions,
    }))
}

async fn insert_vital_signs(
    conn: &mut PgConnection,
    visit: &Visit,
    vitals: &NewVitalSigns,
    recorded_by: Uuid,
) -> ApiResult<VitalSigns> {
    let sql = format!(
        "INSERT INTO vital_signs (visit_id, patient_id, weight_kg, height_cm, bmi, systolic_bp, \
         diastolic_bp, heart_rate, respiratory_rate, temperature_c, oxygen_saturation, recorded_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {}",
        VITAL_SIGNS_COLUMNS
    );
    let row = sqlx::query_as(&sql)
        .bind(visit.id)
        .bind(visit.patient_id)
        .bind(vitals.weight_kg)
        .bind(vitals.height_cm)
        .bind(with_derived_bmi(vitals))
        .bind(vitals.systolic_bp)
        .bind(vitals.diastolic_bp)
        .bind(vitals.heart_rate)
        .bind(vitals.respiratory_rate)
        .bind(vitals.temperature_c)
        .bind(vitals.oxygen_saturation)
        .bind(recorded_by)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub(crate) async fn insert_lab_order(
    conn: &mut PgConnection,
    patient_id: Uuid,
    visit_id: Option<Uuid>,
    order: &NewLabOrder,
    ordered_by: Uuid,
) -> ApiResult<LabOrder> {
    let order_number = events::next_number(&mut *conn, RecordKind::LabOrder).await?;
    let sql = format!(
        "INSERT INTO lab_orders (order_number, patient_id, visit_id, ordered_by, test_code, test_name, \
         priority, clinical_notes) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
        LAB_ORDER_COLUMNS
    );
    let row = sqlx::query_as(&sql)
        .bind(&order_number)
        .bind(patient_id)
        .bind(visit_id)
        .bind(ordered_by)
        .bind(order.test_code.trim().to_uppercase())
        .bind(&order.test_name)
        .bind(order.priority)
        .bind(&order.clinical_notes)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub(crate) async fn insert_prescription(
    conn: &mut PgConnection,
    patient_id: Uuid,
    visit_id: Option<Uuid>,
    prescription: &NewPrescription,
    prescribed_by: Uuid,
) -> ApiResult<PrescriptionWithItems> {
    let number = events::next_number(&mut *conn, RecordKind::Prescription).await?;
    let sql = format!(
        "INSERT INTO prescriptions (prescription_number, patient_id, visit_id, prescribed_by, notes) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        PRESCRIPTION_COLUMNS
    );
    let header: Prescription = sqlx::query_as(&sql)
        .bind(&number)
        .bind(patient_id)
        .bind(visit_id)
        .bind(prescribed_by)
        .bind(&prescription.notes)
        .fetch_one(&mut *conn)
        .await?;

    let item_sql = format!(
        "INSERT INTO prescription_items (prescription_id, medication_name, dosage, frequency, route, \
         duration_days, quantity, instructions) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
        PRESCRIPTION_ITEM_COLUMNS
    );
    let mut items = Vec::with_capacity(prescription.items.len());
    for item in &prescription.items {
        let row: PrescriptionItem = sqlx::query_as(&item_sql)
            .bind(header.id)
            .bind(&item.medication_name)
            .bind(&item.dosage)
            .bind(&item.frequency)
            .bind(&item.route)
            .bind(item.duration_days)
            .bind(item.quantity)
            .bind(&item.instructions)
            .fetch_one(&mut *conn)
            .await?;
        items.push(row);
    }

    Ok(PrescriptionWithItems {
        prescription: header,
        items,
    })
}

#[instrument(skip_all, fields(user = %user.id, visit = %path))]
pub async fn update_visit(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<UpdateVisitRequest>,
) -> ApiResult<ApiResponse<Visit>> {
    user.require(Permission::WritePatients)?;
    let id = path.into_inner();
    let body = body.into_inner();
    body.validate()?;

    let sql = format!(
        "UPDATE visits SET doctor_id = COALESCE($2, doctor_id), \
         chief_complaint = COALESCE($3, chief_complaint), diagnosis = COALESCE($4, diagnosis), \
         treatment_plan = COALESCE($5, treatment_plan), notes = COALESCE($6, notes), \
         updated_at = NOW() WHERE id = $1 RETURNING {}",
        VISIT_COLUMNS
    );
    let visit: Visit = sqlx::query_as(&sql)
        .bind(id)
        .bind(body.doctor_id)
        .bind(&body.chief_complaint)
        .bind(&body.diagnosis)
        .bind(&body.treatment_plan)
        .bind(&body.notes)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(ApiError::NotFound("Visit"))?;

    events::audit(state.db.pool(), user.audit(&meta, "UPDATE", "visit").resource(id)).await;
    Ok(ApiResponse::ok(visit))
}

#[instrument(skip(state, user, meta))]
pub async fn complete_visit(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<Visit>> {
    user.require(Permission::WritePatients)?;
    let id = path.into_inner();
    let sql = format!(
        "UPDATE visits SET status = $2, completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = $3 RETURNING {}",
        VISIT_COLUMNS
    );
    let completed: Option<Visit> = sqlx::query_as(&sql)
        .bind(id)
        .bind(VisitStatus::Completed)
        .bind(VisitStatus::InProgress)
        .fetch_optional(state.db.pool())
        .await?;

    let visit = match completed {
        Some(visit) => visit,
        None => {
            let current: Visit = fetch_by_id(state.db.pool(), VISIT_COLUMNS, "visits", id, "Visit").await?;
            return Err(ApiError::conflict(
                "INVALID_STATUS_TRANSITION",
                format!("visit is already {}", current.status),
            ));
        }
    };

    events::audit(state.db.pool(), user.audit(&meta, "COMPLETE", "visit").resource(id)).await;
    Ok(ApiResponse::ok(visit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::prescription::PrescriptionStatus;

    fn prescription(id: Uuid) -> Prescription {
        Prescription {
            id,
            prescription_number: "RX24000001".into(),
            patient_id: Uuid::nil(),
            visit_id: None,
            prescribed_by: None,
            status: PrescriptionStatus::Active,
            notes: None,
            prescribed_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(prescription_id: Uuid, name: &str) -> PrescriptionItem {
        PrescriptionItem {
            id: Uuid::new_v4(),
            prescription_id,
            medication_name: name.into(),
            dosage: "500 mg".into(),
            frequency: "BID".into(),
            route: None,
            duration_days: None,
            quantity: None,
            instructions: None,
        }
    }

    #[test]
    fn items_are_grouped_under_their_prescription() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let grouped = group_items(
            vec![prescription(a), prescription(b)],
            vec![item(b, "Metformin"), item(a, "Amoxicillin"), item(b, "Lisinopril")],
        );
        assert_eq!(grouped[0].items.len(), 1);
        assert_eq!(grouped[0].items[0].medication_name, "Amoxicillin");
        assert_eq!(grouped[1].items.len(), 2);
    }
}
