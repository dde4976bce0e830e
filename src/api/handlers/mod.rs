//! Request handlers, one module per resource.

pub mod ai_insights;
pub mod appointments;
pub mod audit_logs;
pub mod compliance;
pub mod consent;
pub mod dashboard;
pub mod documents;
pub mod lab_orders;
pub mod monitoring;
pub mod notifications;
pub mod patients;
pub mod prescriptions;
pub mod settings;
pub mod users;
pub mod visits;

use sqlx::postgres::PgRow;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::api::middleware::AuthUser;
use crate::core::permissions::Permission;
use crate::error::{ApiError, ApiResult};
use crate::models::user::Role;

/// `SELECT {columns} FROM {table} WHERE id = $1`, 404 when absent.
pub(crate) async fn fetch_by_id<'e, T, E>(
    executor: E,
    columns: &str,
    table: &str,
    id: Uuid,
    what: &'static str,
) -> ApiResult<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {} FROM {} WHERE id = $1", columns, table);
    sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(ApiError::NotFound(what))
}

/// 404 unless an active patient with this id exists.
pub(crate) async fn ensure_patient_exists<'e, E>(executor: E, patient_id: Uuid) -> ApiResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1 AND is_active)")
            .bind(patient_id)
            .fetch_one(executor)
            .await?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::NotFound("Patient"))
    }
}

/// Staff need `ReadPatients`; a patient may only read the record linked to their account.
pub(crate) async fn ensure_patient_read<'e, E>(executor: E, user: &AuthUser, patient_id: Uuid) -> ApiResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    if user.role != Role::Patient {
        return user.require(Permission::ReadPatients);
    }
    if owns_patient(executor, user, patient_id).await? {
        Ok(())
    } else {
        Err(ApiError::forbidden("patients may only view their own records"))
    }
}

pub(crate) async fn owns_patient<'e, E>(executor: E, user: &AuthUser, patient_id: Uuid) -> ApiResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let owns: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1 AND user_id = $2)")
            .bind(patient_id)
            .bind(user.id)
            .fetch_one(executor)
            .await?;
    Ok(owns)
}

/// Orders may only hang off a visit of the same patient.
pub(crate) async fn ensure_visit_of_patient<'e, E>(
    executor: E,
    visit_id: Option<Uuid>,
    patient_id: Uuid,
) -> ApiResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let Some(visit_id) = visit_id else {
        return Ok(());
    };
    let matches: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM visits WHERE id = $1 AND patient_id = $2)")
            .bind(visit_id)
            .bind(patient_id)
            .fetch_one(executor)
            .await?;
    if matches {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "visit {} does not belong to patient {}",
            visit_id, patient_id
        )))
    }
}
