//! Human-readable record numbers: prefix, two-digit year, zero-padded
//! sequence value. Sequence values come from Postgres sequences.

use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Patient,
    Visit,
    LabOrder,
    Prescription,
    ConsentRequest,
    ConsentContract,
}

impl RecordKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordKind::Patient => "HN",
            RecordKind::Visit => "VN",
            RecordKind::LabOrder => "LAB",
            RecordKind::Prescription => "RX",
            RecordKind::ConsentRequest => "CR",
            RecordKind::ConsentContract => "CC",
        }
    }

    pub fn sequence(&self) -> &'static str {
        match self {
            RecordKind::Patient => "patient_hn_seq",
            RecordKind::Visit => "visit_number_seq",
            RecordKind::LabOrder => "lab_order_number_seq",
            RecordKind::Prescription => "prescription_number_seq",
            RecordKind::ConsentRequest => "consent_request_number_seq",
            RecordKind::ConsentContract => "consent_contract_number_seq",
        }
    }
}

pub fn format_number(kind: RecordKind, at: DateTime<Utc>, seq: i64) -> String {
    format!("{}{:02}{:06}", kind.prefix(), at.year() % 100, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hospital_number_layout() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_number(RecordKind::Patient, at, 42), "HN24000042");
        assert_eq!(format_number(RecordKind::LabOrder, at, 1), "LAB24000001");
    }

    #[test]
    fn sequence_overflowing_padding_keeps_all_digits() {
        let at = Utc.with_ymd_and_hms(2031, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(format_number(RecordKind::Prescription, at, 1_234_567), "RX311234567");
    }
}
