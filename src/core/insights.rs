//! Threshold scoring behind the AI insights endpoints.
//!
//! Inputs are the latest vital signs, abnormal lab results from the last
//! 30 days and the number of active medications. Every rule that fires
//! becomes one persisted insight; the overall risk score is the capped sum
//! of the severity weights.

use serde_json::json;

use super::data::{analyze_vitals, VitalsSnapshot};
use crate::models::insight::{InsightKind, Severity};

pub const POLYPHARMACY_THRESHOLD: i64 = 5;
pub const MAX_RISK_SCORE: u32 = 100;

/// An abnormal result as read back from `lab_results`.
#[derive(Debug, Clone, PartialEq)]
pub struct AbnormalLab {
    pub parameter_name: String,
    pub result_value: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatientSignals {
    pub vitals: Option<VitalsSnapshot>,
    pub abnormal_labs: Vec<AbnormalLab>,
    pub active_medications: i64,
}

/// An insight ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub kind: InsightKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub score: u32,
    pub recommendations: Vec<&'static str>,
    pub source_data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Assessment {
    pub drafts: Vec<InsightDraft>,
    pub risk_score: u32,
    pub risk_level: Severity,
}

pub fn assess(signals: &PatientSignals) -> Assessment {
    let mut drafts = Vec::new();

    if let Some(vitals) = &signals.vitals {
        for f in analyze_vitals(vitals) {
            drafts.push(InsightDraft {
                kind: InsightKind::VitalSigns,
                severity: f.severity,
                title: vital_title(f.code).to_string(),
                description: f.message,
                confidence: 0.9,
                score: f.severity.weight(),
                recommendations: vital_recommendations(f.code),
                source_data: json!({ "rule": f.code, "vitals": vitals }),
            });
        }
    }

    if !signals.abnormal_labs.is_empty() {
        let count = signals.abnormal_labs.len();
        let severity = match count {
            1 => Severity::Low,
            2..=3 => Severity::Medium,
            _ => Severity::High,
        };
        let names: Vec<&str> = signals
            .abnormal_labs
            .iter()
            .map(|l| l.parameter_name.as_str())
            .collect();
        drafts.push(InsightDraft {
            kind: InsightKind::LabResults,
            severity,
            title: "Abnormal laboratory results".into(),
            description: format!("{} abnormal result(s) in the last 30 days: {}", count, names.join(", ")),
            confidence: 0.85,
            score: severity.weight(),
            recommendations: vec![
                "Review abnormal results with the ordering physician",
                "Consider repeat testing to confirm trend",
            ],
            source_data: json!({
                "results": signals.abnormal_labs.iter().map(|l| json!({
                    "parameter": l.parameter_name,
                    "value": l.result_value,
                    "unit": l.unit,
                })).collect::<Vec<_>>()
            }),
        });
    }

    if signals.active_medications >= POLYPHARMACY_THRESHOLD {
        let severity = if signals.active_medications >= 10 {
            Severity::High
        } else {
            Severity::Medium
        };
        drafts.push(InsightDraft {
            kind: InsightKind::Medication,
            severity,
            title: "Polypharmacy".into(),
            description: format!(
                "Patient has {} active medications; interaction risk increases with count",
                signals.active_medications
            ),
            confidence: 0.8,
            score: severity.weight(),
            recommendations: vec![
                "Perform a medication reconciliation",
                "Check for drug-drug interactions",
            ],
            source_data: json!({ "activeMedications": signals.active_medications }),
        });
    }

    let risk_score = drafts
        .iter()
        .map(|d| d.score)
        .sum::<u32>()
        .min(MAX_RISK_SCORE);

    Assessment {
        risk_level: risk_level(risk_score),
        risk_score,
        drafts,
    }
}

pub fn risk_level(score: u32) -> Severity {
    match score {
        0..=19 => Severity::Low,
        20..=49 => Severity::Medium,
        50..=79 => Severity::High,
        _ => Severity::Critical,
    }
}

fn vital_title(code: &str) -> &'static str {
    match code {
        "tachycardia" => "Tachycardia",
        "bradycardia" => "Bradycardia",
        "low_map" => "Low mean arterial pressure",
        "hypertensive_crisis" => "Hypertensive crisis",
        "hypertension" => "Elevated blood pressure",
        "hypoxemia" => "Low oxygen saturation",
        "fever" => "Fever",
        "obesity" => "Obesity",
        "underweight" => "Underweight",
        _ => "Abnormal vital sign",
    }
}

fn vital_recommendations(code: &str) -> Vec<&'static str> {
    match code {
        "tachycardia" | "bradycardia" => vec!["Obtain a 12-lead ECG", "Reassess heart rate in 15 minutes"],
        "low_map" => vec!["Assess perfusion and fluid status", "Escalate to the attending physician"],
        "hypertensive_crisis" => vec!["Repeat blood pressure measurement", "Evaluate for end-organ damage"],
        "hypertension" => vec!["Recheck blood pressure at next visit", "Review antihypertensive therapy"],
        "hypoxemia" => vec!["Apply supplemental oxygen as ordered", "Reassess respiratory status"],
        "fever" => vec!["Evaluate for infection source", "Consider antipyretics"],
        "obesity" | "underweight" => vec!["Nutritional counselling referral"],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signals_no_risk() {
        let a = assess(&PatientSignals::default());
        assert!(a.drafts.is_empty());
        assert_eq!(a.risk_score, 0);
        assert_eq!(a.risk_level, Severity::Low);
    }

    #[test]
    fn polypharmacy_threshold() {
        let four = assess(&PatientSignals { active_medications: 4, ..Default::default() });
        let five = assess(&PatientSignals { active_medications: 5, ..Default::default() });
        assert!(four.drafts.is_empty());
        assert_eq!(five.drafts.len(), 1);
        assert_eq!(five.drafts[0].kind, InsightKind::Medication);
        assert_eq!(five.drafts[0].severity, Severity::Medium);
    }

    #[test]
    fn lab_severity_grows_with_count() {
        let lab = |name: &str| AbnormalLab {
            parameter_name: name.into(),
            result_value: "1".into(),
            unit: None,
        };
        let signals = PatientSignals {
            abnormal_labs: vec![lab("Na"), lab("K"), lab("Cr"), lab("Hb")],
            ..Default::default()
        };
        let a = assess(&signals);
        assert_eq!(a.drafts[0].severity, Severity::High);
        assert!(a.drafts[0].description.contains("Na, K, Cr, Hb"));
    }

    #[test]
    fn risk_score_is_capped() {
        let signals = PatientSignals {
            vitals: Some(VitalsSnapshot {
                heart_rate: Some(140),
                systolic_bp: Some(200),
                diastolic_bp: Some(125),
                oxygen_saturation: Some(84.0),
                temperature_c: Some(40.0),
                bmi: None,
            }),
            abnormal_labs: vec![],
            active_medications: 12,
        };
        let a = assess(&signals);
        assert_eq!(a.risk_score, MAX_RISK_SCORE);
        assert_eq!(a.risk_level, Severity::Critical);
    }

    #[test]
    fn risk_bands() {
        assert_eq!(risk_level(19), Severity::Low);
        assert_eq!(risk_level(20), Severity::Medium);
        assert_eq!(risk_level(50), Severity::High);
        assert_eq!(risk_level(80), Severity::Critical);
    }
}
