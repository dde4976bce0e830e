use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    /// Account role carried in the bearer token and the `users.role` column.
    Role {
        Admin => "admin",
        Doctor => "doctor",
        Nurse => "nurse",
        LabTechnician => "lab_technician",
        Pharmacist => "pharmacist",
        Staff => "staff",
        Patient => "patient",
        ExternalUser => "external_user",
    }
}

impl Role {
    pub fn is_clinical(&self) -> bool {
        matches!(self, Role::Doctor | Role::Nurse)
    }
}

/// A user row without the password hash.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "id, username, email, first_name, last_name, role, department, \
     phone, organization, is_active, last_login_at, created_at, updated_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    /// Organization name for external requesters.
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}
