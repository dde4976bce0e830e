use serde::Serialize;

use crate::models::insight::Severity;
use crate::models::visit::{NewVitalSigns, VitalSigns};

/// The subset of a vital-signs row the threshold rules look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSnapshot {
    pub heart_rate: Option<i32>,
    pub systolic_bp: Option<i32>,
    pub diastolic_bp: Option<i32>,
    pub temperature_c: Option<f64>,
    pub oxygen_saturation: Option<f64>,
    pub bmi: Option<f64>,
}

impl From<&VitalSigns> for VitalsSnapshot {
    fn from(v: &VitalSigns) -> Self {
        Self {
            heart_rate: v.heart_rate,
            systolic_bp: v.systolic_bp,
            diastolic_bp: v.diastolic_bp,
            temperature_c: v.temperature_c,
            oxygen_saturation: v.oxygen_saturation,
            bmi: v.bmi.or_else(|| bmi(v.weight_kg?, v.height_cm?)),
        }
    }
}

/// A single threshold hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalFinding {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// Body-mass index rounded to one decimal.
pub fn bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if weight_kg <= 0.0 || height_cm <= 0.0 {
        return None;
    }
    let meters = height_cm / 100.0;
    Some((weight_kg / (meters * meters) * 10.0).round() / 10.0)
}

/// MAP = (SBP + 2 * DBP) / 3
pub fn mean_arterial_pressure(systolic: i32, diastolic: i32) -> f64 {
    (f64::from(systolic) + 2.0 * f64::from(diastolic)) / 3.0
}

/// Fill in the derived BMI when the caller sent weight and height only.
pub fn with_derived_bmi(vitals: &NewVitalSigns) -> Option<f64> {
    bmi(vitals.weight_kg?, vitals.height_cm?)
}

pub fn analyze_vitals(vitals: &VitalsSnapshot) -> Vec<VitalFinding> {
    let mut findings = Vec::new();

    if let Some(hr) = vitals.heart_rate {
        if hr > 120 {
            findings.push(finding("tachycardia", Severity::High, format!("High heart rate: {} bpm", hr)));
        } else if hr < 50 {
            findings.push(finding("bradycardia", Severity::High, format!("Low heart rate: {} bpm", hr)));
        }
    }

    if let (Some(sys), Some(dia)) = (vitals.systolic_bp, vitals.diastolic_bp) {
        let map = mean_arterial_pressure(sys, dia);
        if map < 65.0 {
            findings.push(finding("low_map", Severity::Critical, format!("Low MAP: {:.0} mmHg", map)));
        }
        if sys >= 180 || dia >= 120 {
            findings.push(finding(
                "hypertensive_crisis",
                Severity::Critical,
                format!("Hypertensive crisis: {}/{} mmHg", sys, dia),
            ));
        } else if sys >= 140 || dia >= 90 {
            findings.push(finding(
                "hypertension",
                Severity::Medium,
                format!("Elevated blood pressure: {}/{} mmHg", sys, dia),
            ));
        }
    }

    if let Some(spo2) = vitals.oxygen_saturation {
        if spo2 < 88.0 {
            findings.push(finding("hypoxemia", Severity::Critical, format!("Critically low oxygen saturation: {}%", spo2)));
        } else if spo2 < 92.0 {
            findings.push(finding("hypoxemia", Severity::High, format!("Low oxygen saturation: {}%", spo2)));
        }
    }

    if let Some(temp) = vitals.temperature_c {
        if temp >= 39.5 {
            findings.push(finding("fever", Severity::High, format!("High fever: {:.1} °C", temp)));
        } else if temp >= 38.0 {
            findings.push(finding("fever", Severity::Medium, format!("Fever: {:.1} °C", temp)));
        }
    }

    if let Some(bmi) = vitals.bmi {
        if bmi >= 30.0 {
            findings.push(finding("obesity", Severity::Low, format!("BMI {:.1} in obese range", bmi)));
        } else if bmi < 18.5 {
            findings.push(finding("underweight", Severity::Low, format!("BMI {:.1} below normal range", bmi)));
        }
    }

    findings
}

fn finding(code: &'static str, severity: Severity, message: String) -> VitalFinding {
    VitalFinding {
        code,
        severity,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(v: &VitalsSnapshot) -> Vec<&'static str> {
        analyze_vitals(v).into_iter().map(|f| f.code).collect()
    }

    #[test]
    fn normal_vitals_raise_nothing() {
        let v = VitalsSnapshot {
            heart_rate: Some(72),
            systolic_bp: Some(118),
            diastolic_bp: Some(76),
            temperature_c: Some(36.8),
            oxygen_saturation: Some(98.0),
            bmi: Some(22.4),
        };
        assert!(analyze_vitals(&v).is_empty());
    }

    #[test]
    fn heart_rate_bounds_are_exclusive() {
        let at_upper = VitalsSnapshot { heart_rate: Some(120), ..Default::default() };
        let above = VitalsSnapshot { heart_rate: Some(121), ..Default::default() };
        let below = VitalsSnapshot { heart_rate: Some(49), ..Default::default() };
        assert!(codes(&at_upper).is_empty());
        assert_eq!(codes(&above), vec!["tachycardia"]);
        assert_eq!(codes(&below), vec!["bradycardia"]);
    }

    #[test]
    fn crisis_supersedes_hypertension() {
        let v = VitalsSnapshot {
            systolic_bp: Some(185),
            diastolic_bp: Some(100),
            ..Default::default()
        };
        assert_eq!(codes(&v), vec!["hypertensive_crisis"]);
    }

    #[test]
    fn shock_pressure_flags_low_map() {
        let v = VitalsSnapshot {
            systolic_bp: Some(80),
            diastolic_bp: Some(50),
            ..Default::default()
        };
        let findings = analyze_vitals(&v);
        assert_eq!(findings[0].code, "low_map");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn spo2_grades() {
        let low = VitalsSnapshot { oxygen_saturation: Some(90.0), ..Default::default() };
        let critical = VitalsSnapshot { oxygen_saturation: Some(85.0), ..Default::default() };
        assert_eq!(analyze_vitals(&low)[0].severity, Severity::High);
        assert_eq!(analyze_vitals(&critical)[0].severity, Severity::Critical);
    }

    #[test]
    fn bmi_is_rounded() {
        assert_eq!(bmi(70.0, 175.0), Some(22.9));
        assert_eq!(bmi(70.0, 0.0), None);
    }

    #[test]
    fn map_formula() {
        assert!((mean_arterial_pressure(120, 80) - 93.333).abs() < 0.01);
    }
}
