use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

text_enum! {
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    InsightStatus {
        New => "new",
        Acknowledged => "acknowledged",
        Dismissed => "dismissed",
    }
}

text_enum! {
    InsightKind {
        VitalSigns => "vital_signs",
        LabResults => "lab_results",
        Medication => "medication",
        RiskScore => "risk_score",
    }
}

impl Severity {
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 5,
            Severity::Medium => 15,
            Severity::High => 30,
            Severity::Critical => 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AiInsight {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub insight_type: InsightKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub score: i32,
    pub recommendations: serde_json::Value,
    pub source_data: serde_json::Value,
    pub status: InsightStatus,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const INSIGHT_COLUMNS: &str = "id, patient_id, insight_type, severity, title, description, \
     confidence, score, recommendations, source_data, status, acknowledged_by, acknowledged_at, \
     created_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightListQuery {
    pub patient_id: Option<Uuid>,
    pub severity: Option<Severity>,
    pub status: Option<InsightStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightStatusRequest {
    pub status: InsightStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedInsights {
    pub patient_id: Uuid,
    pub risk_score: u32,
    pub risk_level: Severity,
    pub insights: Vec<AiInsight>,
}
