use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::appointment::Appointment;

/// A half-open `[start, end)` slot on a physician's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> Self {
        let start = date.and_time(time);
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl From<&Appointment> for Slot {
    fn from(a: &Appointment) -> Self {
        Slot::new(a.appointment_date, a.appointment_time, a.duration_minutes)
    }
}

/// First appointment on the same calendar that still holds its slot and
/// overlaps `candidate`. `ignore` skips the appointment being rescheduled.
pub fn find_conflict<'a>(
    candidate: &Slot,
    existing: &'a [Appointment],
    ignore: Option<uuid::Uuid>,
) -> Option<&'a Appointment> {
    existing.iter().find(|a| {
        Some(a.id) != ignore
            && a.status.blocks_slot()
            && Slot::from(*a).overlaps(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::appointment::AppointmentStatus;
    use uuid::Uuid;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn appointment(h: u32, m: u32, minutes: i32, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            physician_id: Uuid::nil(),
            appointment_date: date(),
            appointment_time: time(h, m),
            duration_minutes: minutes,
            appointment_type: "consultation".into(),
            reason: None,
            status,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn overlapping_slot_conflicts() {
        let existing = vec![appointment(9, 0, 30, AppointmentStatus::Scheduled)];
        let candidate = Slot::new(date(), time(9, 15), 30);
        assert!(find_conflict(&candidate, &existing, None).is_some());
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        let existing = vec![appointment(9, 0, 30, AppointmentStatus::Confirmed)];
        let after = Slot::new(date(), time(9, 30), 30);
        let before = Slot::new(date(), time(8, 30), 30);
        assert!(find_conflict(&after, &existing, None).is_none());
        assert!(find_conflict(&before, &existing, None).is_none());
    }

    #[test]
    fn cancelled_appointments_free_the_slot() {
        let existing = vec![
            appointment(9, 0, 60, AppointmentStatus::Cancelled),
            appointment(9, 0, 60, AppointmentStatus::NoShow),
        ];
        let candidate = Slot::new(date(), time(9, 0), 60);
        assert!(find_conflict(&candidate, &existing, None).is_none());
    }

    #[test]
    fn rescheduling_ignores_itself() {
        let existing = vec![appointment(9, 0, 30, AppointmentStatus::Scheduled)];
        let candidate = Slot::new(date(), time(9, 10), 30);
        assert!(find_conflict(&candidate, &existing, Some(existing[0].id)).is_none());
    }

    #[test]
    fn containing_slot_conflicts() {
        let existing = vec![appointment(10, 0, 15, AppointmentStatus::Scheduled)];
        let candidate = Slot::new(date(), time(9, 0), 120);
        assert!(find_conflict(&candidate, &existing, None).is_some());
    }
}
