use actix_web::web;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{ensure_patient_exists, ensure_patient_read};
use crate::api::middleware::{AuthUser, RequestMeta};
use crate::api::response::{ApiResponse, PageParams};
use crate::core::data::VitalsSnapshot;
use crate::core::insights::{assess, AbnormalLab, PatientSignals};
use crate::core::permissions::Permission;
use crate::db::events;
use crate::db::queries::ListQuery;
use crate::error::{ApiError, ApiResult};
use crate::models::insight::{
    AiInsight, GeneratedInsights, InsightListQuery, InsightStatus, InsightStatusRequest, Severity,
    INSIGHT_COLUMNS,
};
use crate::models::notification::{NewNotification, NotificationPriority};
use crate::models::user::Role;
use crate::models::visit::{VitalSigns, VITAL_SIGNS_COLUMNS};
use crate::AppState;

#[derive(sqlx::FromRow)]
struct AbnormalRow {
    parameter_name: String,
    result_value: String,
    unit: Option<String>,
}

#[instrument(skip_all, fields(user = %user.id))]
pub async fn list_insights(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageParams>,
    query: web::Query<InsightListQuery>,
) -> ApiResult<ApiResponse<Vec<AiInsight>>> {
    user.require(Permission::ViewInsights)?;
    let query = query.into_inner();
    let (insights, meta) = ListQuery::new(INSIGHT_COLUMNS, "ai_insights")
        .filter("patient_id", query.patient_id)
        .filter("severity", query.severity)
        .filter("status", query.status)
        .order_by("score DESC, created_at DESC")
        .fetch_page::<AiInsight>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(insights, meta))
}

#[instrument(skip(state, user, page))]
pub async fn list_patient_insights(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    page: web::Query<PageParams>,
) -> ApiResult<ApiResponse<Vec<AiInsight>>> {
    user.require(Permission::ViewInsights)?;
    let patient_id = path.into_inner();
    ensure_patient_read(state.db.pool(), &user, patient_id).await?;
    let (insights, meta) = ListQuery::new(INSIGHT_COLUMNS, "ai_insights")
        .filter("patient_id", Some(patient_id))
        .order_by("created_at DESC")
        .fetch_page::<AiInsight>(state.db.pool(), &page)
        .await?;
    Ok(ApiResponse::paginated(insights, meta))
}

async fn load_signals(state: &AppState, patient_id: Uuid) -> ApiResult<PatientSignals> {
    let pool = state.db.pool();
    let vitals_sql = format!(
        "SELECT {} FROM vital_signs WHERE patient_id = $1 ORDER BY measured_at DESC LIMIT 1",
        VITAL_SIGNS_COLUMNS
    );
    let vitals = sqlx::query_as::<_, VitalSigns>(&vitals_sql).bind(patient_id).fetch_optional(pool);
    let labs = sqlx::query_as::<_, AbnormalRow>(
        "SELECT r.parameter_name, r.result_value, r.unit FROM lab_results r \
         JOIN lab_orders o ON o.id = r.lab_order_id \
         WHERE o.patient_id = $1 AND r.is_abnormal AND r.resulted_at >= NOW() - INTERVAL '30 days' \
         ORDER BY r.resulted_at DESC",
    )
    .bind(patient_id)
    .fetch_all(pool);
    let medications = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM prescription_items i JOIN prescriptions p ON p.id = i.prescription_id \
         WHERE p.patient_id = $1 AND p.status IN ('active', 'dispensed')",
    )
    .bind(patient_id)
    .fetch_one(pool);

    let (vitals, labs, active_medications) = futures::try_join!(vitals, labs, medications)?;
    Ok(PatientSignals {
        vitals: vitals.as_ref().map(VitalsSnapshot::from),
        abnormal_labs: labs
            .into_iter()
            .map(|r| AbnormalLab {
                parameter_name: r.parameter_name,
                result_value: r.result_value,
                unit: r.unit,
            })
            .collect(),
        active_medications,
    })
}

/// Score the patient's current data and persist one insight per finding.
/// Earlier unreviewed insights are superseded.
#[instrument(skip(state, user, meta))]
pub async fn generate_insights(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
) -> ApiResult<ApiResponse<GeneratedInsights>> {
    user.require(Permission::GenerateInsights)?;
    let patient_id = path.into_inner();
    ensure_patient_exists(state.db.pool(), patient_id).await?;

    let signals = load_signals(&state, patient_id).await?;
    let assessment = assess(&signals);

    let mut tx = state.db.transaction().await?;
    sqlx::query("UPDATE ai_insights SET status = 'dismissed' WHERE patient_id = $1 AND status = 'new'")
        .bind(patient_id)
        .execute(&mut *tx)
        .await?;

    let sql = format!(
        "INSERT INTO ai_insights (patient_id, insight_type, severity, title, description, confidence, \
         score, recommendations, source_data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
        INSIGHT_COLUMNS
    );
    let mut insights = Vec::with_capacity(assessment.drafts.len());
    for draft in &assessment.drafts {
        let row: AiInsight = sqlx::query_as(&sql)
            .bind(patient_id)
            .bind(draft.kind)
            .bind(draft.severity)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.confidence)
            .bind(draft.score as i32)
            .bind(json!(draft.recommendations))
            .bind(&draft.source_data)
            .fetch_one(&mut *tx)
            .await?;
        insights.push(row);
    }

    if matches!(assessment.risk_level, Severity::High | Severity::Critical) {
        let notification = NewNotification {
            title: format!("{} risk patient", assessment.risk_level),
            message: format!(
                "Risk score {} with {} finding(s) requires review",
                assessment.risk_score,
                insights.len()
            ),
            notification_type: "ai_insight",
            priority: if assessment.risk_level == Severity::Critical {
                NotificationPriority::Urgent
            } else {
                NotificationPriority::High
            },
            related_entity_type: Some("patient"),
            related_entity_id: Some(patient_id),
        };
        events::notify_role(&mut *tx, Role::Doctor, &notification).await?;
    }
    tx.commit().await?;
    info!(%patient_id, risk = assessment.risk_score, findings = insights.len(), "insights generated");

    events::audit(
        state.db.pool(),
        user.audit(&meta, "GENERATE", "ai_insight")
            .resource(patient_id)
            .details(json!({ "riskScore": assessment.risk_score, "findings": insights.len() })),
    )
    .await;

    Ok(ApiResponse::created(GeneratedInsights {
        patient_id,
        risk_score: assessment.risk_score,
        risk_level: assessment.risk_level,
        insights,
    }))
}

#[instrument(skip_all, fields(user = %user.id, insight = %path, status = %body.status))]
pub async fn update_insight_status(
    state: web::Data<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    path: web::Path<Uuid>,
    body: web::Json<InsightStatusRequest>,
) -> ApiResult<ApiResponse<AiInsight>> {
    user.require(Permission::ViewInsights)?;
    let next = body.status;
    if next == InsightStatus::New {
        return Err(ApiError::Validation("status must be acknowledged or dismissed".into()));
    }
    let id = path.into_inner();

    let sql = format!(
        "UPDATE ai_insights SET status = $2, acknowledged_by = $3, acknowledged_at = NOW() \
         WHERE id = $1 AND status = 'new' RETURNING {}",
        INSIGHT_COLUMNS
    );
    let updated: Option<AiInsight> = sqlx::query_as(&sql)
        .bind(id)
        .bind(next)
        .bind(user.id)
        .fetch_optional(state.db.pool())
        .await?;
    let insight = match updated {
        Some(insight) => insight,
        None => {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ai_insights WHERE id = $1)")
                .bind(id)
                .fetch_one(state.db.pool())
                .await?;
            return Err(if exists {
                ApiError::conflict("INVALID_STATUS_TRANSITION", "insight has already been reviewed")
            } else {
                ApiError::NotFound("Insight")
            });
        }
    };

    events::audit(
        state.db.pool(),
        user.audit(&meta, "STATUS_CHANGE", "ai_insight")
            .resource(id)
            .details(json!({ "status": next })),
    )
    .await;
    Ok(ApiResponse::ok(insight))
}
