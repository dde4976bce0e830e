use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::lab::{LabOrder, NewLabOrder};
use super::prescription::{NewPrescription, PrescriptionWithItems};
use super::text_enum;

text_enum! {
    VisitType {
        Outpatient => "outpatient",
        Inpatient => "inpatient",
        Emergency => "emergency",
        FollowUp => "follow_up",
        Telemedicine => "telemedicine",
    }
}

text_enum! {
    VisitStatus {
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub id: Uuid,
    pub visit_number: String,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub visit_type: VisitType,
    pub status: VisitStatus,
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub visit_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const VISIT_COLUMNS: &str = "id, visit_number, patient_id, doctor_id, visit_type, status, \
     chief_complaint, diagnosis, treatment_plan, notes, visit_date, completed_at, created_by, \
     created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VitalSigns {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
    pub systolic_bp: Option<i32>,
    pub diastolic_bp: Option<i32>,
    pub heart_rate: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub temperature_c: Option<f64>,
    pub oxygen_saturation: Option<f64>,
    pub recorded_by: Option<Uuid>,
    pub measured_at: DateTime<Utc>,
}

pub const VITAL_SIGNS_COLUMNS: &str = "id, visit_id, patient_id, weight_kg, height_cm, bmi, \
     systolic_bp, diastolic_bp, heart_rate, respiratory_rate, temperature_c, oxygen_saturation, \
     recorded_by, measured_at";

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewVitalSigns {
    #[validate(range(min = 0.5, max = 500.0))]
    pub weight_kg: Option<f64>,
    #[validate(range(min = 20.0, max = 300.0))]
    pub height_cm: Option<f64>,
    #[validate(range(min = 40, max = 300))]
    pub systolic_bp: Option<i32>,
    #[validate(range(min = 20, max = 200))]
    pub diastolic_bp: Option<i32>,
    #[validate(range(min = 20, max = 300))]
    pub heart_rate: Option<i32>,
    #[validate(range(min = 4, max = 80))]
    pub respiratory_rate: Option<i32>,
    #[validate(range(min = 30.0, max = 45.0))]
    pub temperature_c: Option<f64>,
    #[validate(range(min = 50.0, max = 100.0))]
    pub oxygen_saturation: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVisitRequest {
    pub doctor_id: Option<Uuid>,
    pub visit_type: VisitType,
    #[validate(length(max = 1000))]
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub visit_date: Option<DateTime<Utc>>,
    #[validate]
    pub vital_signs: Option<NewVitalSigns>,
    #[serde(default)]
    #[validate]
    pub lab_orders: Vec<NewLabOrder>,
    #[serde(default)]
    #[validate]
    pub prescriptions: Vec<NewPrescription>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVisitRequest {
    pub doctor_id: Option<Uuid>,
    #[validate(length(max = 1000))]
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
}

/// A visit together with everything recorded at creation time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDetail {
    #[serde(flatten)]
    pub visit: Visit,
    pub vital_signs: Vec<VitalSigns>,
    pub lab_orders: Vec<LabOrder>,
    pub prescriptions: Vec<PrescriptionWithItems>,
}
