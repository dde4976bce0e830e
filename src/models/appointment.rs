use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

text_enum! {
    AppointmentStatus {
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

impl AppointmentStatus {
    /// Whether an appointment in this state still occupies the physician's slot.
    pub fn blocks_slot(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::Completed
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Scheduled => matches!(next, Confirmed | Cancelled | NoShow | Completed),
            Confirmed => matches!(next, Completed | Cancelled | NoShow),
            Completed | Cancelled | NoShow => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub physician_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub appointment_type: String,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const APPOINTMENT_COLUMNS: &str = "id, patient_id, physician_id, appointment_date, \
     appointment_time, duration_minutes, appointment_type, reason, status, notes, created_by, \
     created_at, updated_at";

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.appointment_time)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub physician_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    #[serde(default = "default_duration")]
    #[validate(range(min = 5, max = 480))]
    pub duration_minutes: i32,
    #[validate(length(min = 1, max = 50))]
    pub appointment_type: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub notes: Option<String>,
}

fn default_duration() -> i32 {
    30
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub physician_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    #[validate(range(min = 5, max = 480))]
    pub duration_minutes: Option<i32>,
    #[validate(length(min = 1, max = 50))]
    pub appointment_type: Option<String>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentStatusRequest {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentListQuery {
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub physician_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

#[cfg(test)]
mod tests {
    use super::AppointmentStatus::*;

    #[test]
    fn terminal_states_do_not_move() {
        for next in super::AppointmentStatus::ALL {
            assert!(!Completed.can_transition_to(*next));
            assert!(!Cancelled.can_transition_to(*next));
            assert!(!NoShow.can_transition_to(*next));
        }
    }

    #[test]
    fn cancelled_and_no_show_free_the_slot() {
        assert!(Scheduled.blocks_slot());
        assert!(Confirmed.blocks_slot());
        assert!(!Cancelled.blocks_slot());
        assert!(!NoShow.blocks_slot());
    }
}
