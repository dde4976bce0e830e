use actix_web::web;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::visits::insert_lab_order;
use super::{ensure_patient_exists, ensure_patient_read, ensure_visit_of_patient, fetch_by_id};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::lab::{
    CreateLabOrderRequest, LabOrder, LabOrderListQuery, LabOrderStatus, LabOrderWithResults, LabResult,
    LabStatusRequest, RecordLabResultsRequest, LAB_ORDER_COLUMNS, LAB_RESULT_COLUMNS,
};
use crate::models::notification::{NewNotification, NotificationPriority};
use crate::AppState;

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_lab_orders(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<LabOrderListQuery>,
) -> ApiResult<ApiResponse<Vec<LabOrder>>> {
    user.require(Permission::ReadPatients)?;
    let query = query.into_inner();
    let (orders, meta) = ListQuery::new(LAB_ORDER_COLUMNS, "lab_orders")
        .filter("status", query.status)
        .filter("priority", query.priority)
        .filter("patient_id", query.patient_id)
        .order_by("CASE priority WHEN 'stat' THEN 0 WHEN 'urgent' THEN 1 ELSE 2 END, ordered_at DESC")
        .fetch_page::<LabOrder>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(orders, meta))
}

#[instrument(skip(state, user, page))]
pub async fn list_patient_lab_orders(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
) -> ApiResult<ApiResponse<Vec<LabOrder>>> {
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (orders, meta) = ListQuery::new(LAB_ORDER_COLUMNS, "lab_orders")
        .filter("patient_id", Some(patient_id))
        .order_by("ordered_at DESC")
        .fetch_page::<LabOrder>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(orders, meta))
}

#[instrument(skip_all, fields(user = %user.id, patient = %path))]
pub async fn create_lab_orders(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<CreateLabOrderRequest>,
) -> ApiResult<ApiResponse<Vec<LabOrder>>> {
    user.require(Permission::OrderLabs)?;
    let body = body.into_inner();
    body.validate()?;
    let patient_id = path.into_inner();

    let mut tx = state.db.transaction().await?;
    ensure_patient_exists(&mut *tx, patient_id).await?;
    ensure_visit_of_patient(&mut *tx, body.visit_id, patient_id).await?;
    let mut orders = Vec::with_capacity(body.tests.len());
    for test in &body.tests {
        orders.push(insert_lab_order(&mut tx, patient_id, body.visit_id, test, user.id).await?);
    }
    tx.commit().await?;

    let numbers: Vec<&str> = orders.iter().map(|o| o.order_number.as_str()).collect();
    events::audit(
        state.db.pool(),
        user.audit(&meta, "CREATE", "lab_order")
            .resource(patient_id)
            .details(json!({ "orders": numbers })),
    )
    .await;

    Ok(ApiResponse::created(orders))
}

async fn load_results(state: &AppState, order_id: Uuid) -> ApiResult<Vec<LabResult>> {
    let sql = format!(
        "SELECT {} FROM lab_results WHERE lab_order_id = $1 ORDER BY resulted_at, parameter_name",
        LAB_RESULT_COLUMNS
    );
    let results = sqlx::query_as(&sql).bind(order_id).fetch_all(state.db.pool()).await?;
    Ok(results)
}

#[instrument(skip(state, user))]
pub async fn get_lab_order(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<LabOrderWithResults>> {
    let order: LabOrder =
        fetch_by_id(state.db.pool(), LAB_ORDER_COLUMNS, "lab_orders", path.into_inner(), "Lab order").await?;
    ensure_patient_read(state.db.pool(), &user, order.patient_id).await?;
    let results = load_results(&state, order.id).await?;
    Ok(ApiResponse::ok(LabOrderWithResults { order, results }))
}

#[instrument(skip_all, fields(user = %user.id, order = %path, status = %body.status))]
pub async fn update_lab_order_status(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<LabStatusRequest>,
) -> ApiResult<ApiResponse<LabOrder>> {
    let next = body.status;
    match next {
        LabOrderStatus::Cancelled => user.require(Permission::OrderLabs)?,
        _ => user.require(Permission::EnterLabResults)?,
    }
    let id = path.into_inner();

    let current: LabOrder = fetch_by_id(state.db.pool(), LAB_ORDER_COLUMNS, "lab_orders", id, "Lab order").await?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::conflict(
            "INVALID_STATUS_TRANSITION",
            format!("cannot move lab order from {} to {}", current.status, next),
        ));
    }

    let sql = format!(
        "UPDATE lab_orders SET status = $2, \
         completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END \
         WHERE id = $1 AND status = $3 RETURNING {}",
        LAB_ORDER_COLUMNS
    );
    let order: LabOrder = sqlx::query_as(&sql)
        .bind(id)
        .bind(next)
        .bind(current.status)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or_else(|| ApiError::conflict("INVALID_STATUS_TRANSITION", "lab order changed concurrently"))?;

    events::audit(
        state.db.pool(),
        user.audit(&meta, "STATUS_CHANGE", "lab_order")
            .resource(id)
            .details(json!({ "from": current.status, "to": next })),
    )
    .await;
    Ok(ApiResponse::ok(order))
}

/// Record results, flag abnormal values, complete the order and tell the
/// ordering clinician when anything is out of range. All or nothing.
#[instrument(skip_all, fields(user = %user.id, order = %path))]
pub async fn record_lab_results(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<RecordLabResultsRequest>,
) -> ApiResult<ApiResponse<LabOrderWithResults>> {
    user.require(Permission::EnterLabResults)?;
    let body = body.into_inner();
    body.validate()?;
    let id = path.into_inner();

    let mut tx = state.db.transaction().await?;
    let lock_sql = format!("SELECT {} FROM lab_orders WHERE id = $1 FOR UPDATE", LAB_ORDER_COLUMNS);
    let current: LabOrder = sqlx::query_as(&lock_sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("Lab order"))?;
    if current.status.is_terminal() {
        return Err(ApiError::conflict(
            "INVALID_STATUS_TRANSITION",
            format!("lab order is already {}", current.status),
        ));
    }

    let insert_sql = format!(
        "INSERT INTO lab_results (lab_order_id, parameter_name, result_value, numeric_value, unit, \
         reference_low, reference_high, is_abnormal, interpretation, resulted_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
        LAB_RESULT_COLUMNS
    );
    let mut results = Vec::with_capacity(body.results.len());
    for result in &body.results {
        let row: LabResult = sqlx::query_as(&insert_sql)
            .bind(id)
            .bind(&result.parameter_name)
            .bind(&result.result_value)
            .bind(result.numeric_value())
            .bind(&result.unit)
            .bind(result.reference_low)
            .bind(result.reference_high)
            .bind(result.is_abnormal())
            .bind(&result.interpretation)
            .bind(user.id)
            .fetch_one(&mut *tx)
            .await?;
        results.push(row);
    }

    let complete_sql = format!(
        "UPDATE lab_orders SET status = $2, completed_at = NOW() WHERE id = $1 RETURNING {}",
        LAB_ORDER_COLUMNS
    );
    let order: LabOrder = sqlx::query_as(&complete_sql)
        .bind(id)
        .bind(LabOrderStatus::Completed)
        .fetch_one(&mut *tx)
        .await?;

    let abnormal: Vec<&str> = results
        .iter()
        .filter(|r| r.is_abnormal)
        .map(|r| r.parameter_name.as_str())
        .collect();
    if let (false, Some(clinician)) = (abnormal.is_empty(), order.ordered_by) {
        let notification = NewNotification {
            title: format!("Abnormal results: {}", order.test_name),
            message: format!(
                "Order {} has {} abnormal result(s): {}",
                order.order_number,
                abnormal.len(),
                abnormal.join(", ")
            ),
            notification_type: "lab_result",
            priority: NotificationPriority::High,
            related_entity_type: Some("lab_order"),
            related_entity_id: Some(order.id),
        };
        events::notify(&mut *tx, clinician, &notification).await?;
    }
    tx.commit().await?;
    info!(order = %order.order_number, results = results.len(), abnormal = abnormal.len(), "lab results recorded");

    events::audit(
        state.db.pool(),
        user.audit(&meta, "RECORD_RESULTS", "lab_order")
            .resource(id)
            .details(json!({ "results": results.len(), "abnormal": abnormal })),
    )
    .await;

    Ok(ApiResponse::created(LabOrderWithResults { order, results }))
}
