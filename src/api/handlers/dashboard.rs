use actix_web::web;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::api::middleware::AuthUser;
use crate::api::response::ApiResponse;
use crate::core::permissions::Permission;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub active_patients: i64,
    pub todays_appointments: i64,
    pub pending_lab_orders: i64,
    pub active_prescriptions: i64,
    pub pending_consent_requests: i64,
    pub unread_notifications: i64,
    pub critical_insights: i64,
    pub generated_at: DateTime<Utc>,
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn stats(state: web::Data<AppState>, user: AuthUser) -> ApiResult<ApiResponse<DashboardStats>> {
    user.require(Permission::ViewDashboard)?;
    let pool = state.db.pool();

    let count = move |sql: &'static str| sqlx::query_scalar::<_, i64>(sql).fetch_one(pool);
    let unread = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read",
    )
    .bind(user.id)
    .fetch_one(pool);

    let (patients, appointments, labs, prescriptions, consents, unread, insights) = futures::try_join!(
        count("SELECT COUNT(*) FROM patients WHERE is_active"),
        count(
            "SELECT COUNT(*) FROM appointments WHERE appointment_date = CURRENT_DATE \
             AND status NOT IN ('cancelled', 'no_show')"
        ),
        count("SELECT COUNT(*) FROM lab_orders WHERE status NOT IN ('completed', 'cancelled')"),
        count("SELECT COUNT(*) FROM prescriptions WHERE status = 'active'"),
        count("SELECT COUNT(*) FROM consent_requests WHERE status = 'pending' AND expires_at > NOW()"),
        unread,
        count("SELECT COUNT(*) FROM ai_insights WHERE status = 'new' AND severity IN ('high', 'critical')"),
    )?;

    Ok(ApiResponse::ok(DashboardStats {
        active_patients: patients,
        todays_appointments: appointments,
        pending_lab_orders: labs,
        active_prescriptions: prescriptions,
        pending_consent_requests: consents,
        unread_notifications: unread,
        critical_insights: insights,
        generated_at: Utc::now(),
    }))
}
