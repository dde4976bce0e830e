use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    PrescriptionStatus {
        Active => "active",
        Dispensed => "dispensed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl PrescriptionStatus {
    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        use PrescriptionStatus::*;
        matches!(
            (self, next),
            (Active, Dispensed) | (Dispensed, Completed) | (Active, Cancelled) | (Dispensed, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: Uuid,
    pub prescription_number: String,
    pub patient_id: Uuid,
    pub visit_id: Option<Uuid>,
    pub prescribed_by: Option<Uuid>,
    pub status: PrescriptionStatus,
    pub notes: Option<String>,
    pub prescribed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PRESCRIPTION_COLUMNS: &str = "id, prescription_number, patient_id, visit_id, \
     prescribed_by, status, notes, prescribed_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionItem {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub route: Option<String>,
    pub duration_days: Option<i32>,
    pub quantity: Option<i32>,
    pub instructions: Option<String>,
}

pub const PRESCRIPTION_ITEM_COLUMNS: &str = "id, prescription_id, medication_name, dosage, \
     frequency, route, duration_days, quantity, instructions";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescriptionItem {
    #[validate(length(min = 1, max = 200))]
    pub medication_name: String,
    #[validate(length(min = 1, max = 100))]
    pub dosage: String,
    #[validate(length(min = 1, max = 100))]
    pub frequency: String,
    pub route: Option<String>,
    #[validate(range(min = 1, max = 365))]
    pub duration_days: Option<i32>,
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescription {
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "at least one item is required"))]
    #[validate]
    pub items: Vec<NewPrescriptionItem>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrescriptionRequest {
    pub visit_id: Option<Uuid>,
    #[serde(flatten)]
    #[validate]
    pub prescription: NewPrescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionStatusRequest {
    pub status: PrescriptionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionListQuery {
    pub status: Option<PrescriptionStatus>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionWithItems {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
}

#[cfg(test)]
mod tests {
    use super::PrescriptionStatus::*;
    use super::*;

    #[test]
    fn prescription_needs_items() {
        let empty: CreatePrescriptionRequest = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert!(empty.validate().is_err());

        let one: CreatePrescriptionRequest = serde_json::from_str(
            r#"{"visitId": null, "items": [{"medicationName": "Amoxicillin", "dosage": "500 mg", "frequency": "tid"}]}"#,
        )
        .unwrap();
        assert!(one.validate().is_ok());
        assert_eq!(one.prescription.items.len(), 1);
    }

    #[test]
    fn dispense_then_complete() {
        assert!(Active.can_transition_to(Dispensed));
        assert!(Dispensed.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(Dispensed.can_transition_to(Cancelled));
    }
}
