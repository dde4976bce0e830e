use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    LabPriority {
        Routine => "routine",
        Urgent => "urgent",
        Stat => "stat",
    }
}

text_enum! {
    LabOrderStatus {
        Pending => "pending",
        Collected => "collected",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl LabOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LabOrderStatus::Completed | LabOrderStatus::Cancelled)
    }

    /// pending -> collected -> in_progress -> completed; anything open may be cancelled.
    pub fn can_transition_to(&self, next: LabOrderStatus) -> bool {
        use LabOrderStatus::*;
        match (self, next) {
            (from, Cancelled) => !from.is_terminal(),
            (Pending, Collected) | (Collected, InProgress) | (InProgress, Completed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LabOrder {
    pub id: Uuid,
    pub order_number: String,
    pub patient_id: Uuid,
    pub visit_id: Option<Uuid>,
    pub ordered_by: Option<Uuid>,
    pub test_code: String,
    pub test_name: String,
    pub priority: LabPriority,
    pub status: LabOrderStatus,
    pub clinical_notes: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub const LAB_ORDER_COLUMNS: &str = "id, order_number, patient_id, visit_id, ordered_by, \
     test_code, test_name, priority, status, clinical_notes, ordered_at, completed_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: Uuid,
    pub lab_order_id: Uuid,
    pub parameter_name: String,
    pub result_value: String,
    pub numeric_value: Option<f64>,
    pub unit: Option<String>,
    pub reference_low: Option<f64>,
    pub reference_high: Option<f64>,
    pub is_abnormal: bool,
    pub interpretation: Option<String>,
    pub resulted_by: Option<Uuid>,
    pub resulted_at: DateTime<Utc>,
}

pub const LAB_RESULT_COLUMNS: &str = "id, lab_order_id, parameter_name, result_value, \
     numeric_value, unit, reference_low, reference_high, is_abnormal, interpretation, \
     resulted_by, resulted_at";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewLabOrder {
    #[validate(length(min = 1, max = 32))]
    pub test_code: String,
    #[validate(length(min = 1, max = 200))]
    pub test_name: String,
    #[serde(default = "default_priority")]
    pub priority: LabPriority,
    pub clinical_notes: Option<String>,
}

fn default_priority() -> LabPriority {
    LabPriority::Routine
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabOrderRequest {
    pub visit_id: Option<Uuid>,
    #[validate(length(min = 1, message = "at least one test is required"))]
    #[validate]
    pub tests: Vec<NewLabOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewLabResult {
    #[validate(length(min = 1, max = 200))]
    pub parameter_name: String,
    #[validate(length(min = 1, max = 200))]
    pub result_value: String,
    pub unit: Option<String>,
    pub reference_low: Option<f64>,
    pub reference_high: Option<f64>,
    pub interpretation: Option<String>,
}

impl NewLabResult {
    pub fn numeric_value(&self) -> Option<f64> {
        self.result_value.trim().parse::<f64>().ok()
    }

    /// Outside the reference range. Non-numeric values are never flagged.
    pub fn is_abnormal(&self) -> bool {
        let Some(value) = self.numeric_value() else {
            return false;
        };
        self.reference_low.is_some_and(|low| value < low)
            || self.reference_high.is_some_and(|high| value > high)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordLabResultsRequest {
    #[validate(length(min = 1, message = "at least one result is required"))]
    #[validate]
    pub results: Vec<NewLabResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabStatusRequest {
    pub status: LabOrderStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabOrderListQuery {
    pub status: Option<LabOrderStatus>,
    pub priority: Option<LabPriority>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabOrderWithResults {
    #[serde(flatten)]
    pub order: LabOrder,
    pub results: Vec<LabResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn result(value: &str, low: Option<f64>, high: Option<f64>) -> NewLabResult {
        NewLabResult {
            parameter_name: "Glucose".into(),
            result_value: value.into(),
            unit: Some("mg/dL".into()),
            reference_low: low,
            reference_high: high,
            interpretation: None,
        }
    }

    #[test_case("95", Some(70.0), Some(100.0), false ; "in range")]
    #[test_case("100", Some(70.0), Some(100.0), false ; "upper bound inclusive")]
    #[test_case("140", Some(70.0), Some(100.0), true ; "high")]
    #[test_case("55", Some(70.0), None, true ; "low with open upper bound")]
    #[test_case("positive", Some(0.0), Some(1.0), false ; "qualitative")]
    fn abnormal_flag(value: &str, low: Option<f64>, high: Option<f64>, abnormal: bool) {
        assert_eq!(result(value, low, high).is_abnormal(), abnormal);
    }

    #[test]
    fn order_needs_at_least_one_valid_test() {
        let empty: CreateLabOrderRequest = serde_json::from_str(r#"{"tests": []}"#).unwrap();
        assert!(empty.validate().unwrap_err().field_errors().contains_key("tests"));

        let blank: CreateLabOrderRequest =
            serde_json::from_str(r#"{"tests": [{"testCode": "", "testName": "CBC"}]}"#).unwrap();
        assert!(blank.validate().is_err());

        let ok: CreateLabOrderRequest =
            serde_json::from_str(r#"{"tests": [{"testCode": "CBC", "testName": "Complete blood count"}]}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.tests[0].priority, LabPriority::Routine);
    }

    #[test]
    fn status_transitions() {
        use LabOrderStatus::*;
        assert!(Pending.can_transition_to(Collected));
        assert!(Collected.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
    }
}
