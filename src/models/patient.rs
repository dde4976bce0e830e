use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    Gender {
        Male => "male",
        Female => "female",
        Other => "other",
        Unknown => "unknown",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub hn: String,
    pub national_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub chronic_diseases: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PATIENT_COLUMNS: &str = "id, hn, national_id, first_name, last_name, date_of_birth, \
     gender, phone, email, address, blood_type, allergies, chronic_diseases, \
     emergency_contact_name, emergency_contact_phone, user_id, is_active, created_at, updated_at";

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        let dob = self.date_of_birth;
        let mut years = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    #[validate(length(min = 5, max = 20))]
    pub national_id: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    #[validate(length(max = 5))]
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub chronic_diseases: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    /// Portal account linked to this record.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    #[validate(length(max = 5))]
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub chronic_diseases: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientListQuery {
    pub search: Option<String>,
    pub gender: Option<Gender>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_counts_whole_years() {
        let patient = Patient {
            id: Uuid::nil(),
            hn: "HN24000001".into(),
            national_id: None,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 15).unwrap(),
            gender: Gender::Female,
            phone: None,
            email: None,
            address: None,
            blood_type: None,
            allergies: None,
            chronic_diseases: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            user_id: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), 33);
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 34);
        assert_eq!(patient.full_name(), "Ada Lovelace");
    }
}
