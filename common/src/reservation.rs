use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type ReservationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Estados finales: una reserva en este estado sólo admite cambios de `status`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Cancelled
        )
    }

    /// Acepta el nombre del estado sin importar mayúsculas ni espacios alrededor.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub guest_name: String,
    pub status: ReservationStatus,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
}

/// Cambios parciales sobre una reserva. `None` deja el campo como está.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out_date: Option<NaiveDate>,
}

impl ReservationPatch {
    pub fn status_only(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Sobrescribe todos los campos con los del registro entrante.
    pub fn overwrite(record: &ReservationRecord) -> Self {
        Self {
            guest_name: Some(record.guest_name.clone()),
            status: Some(record.status),
            check_in_date: Some(record.check_in_date),
            check_out_date: Some(record.check_out_date),
        }
    }

    pub fn apply(&self, record: &mut ReservationRecord) {
        if let Some(ref name) = self.guest_name {
            record.guest_name = name.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(date) = self.check_in_date {
            record.check_in_date = date;
        }
        if let Some(date) = self.check_out_date {
            record.check_out_date = date;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignora_mayusculas_y_espacios() {
        assert_eq!(
            ReservationStatus::parse("  confirmed "),
            Some(ReservationStatus::Confirmed)
        );
        assert_eq!(
            ReservationStatus::parse("Cancelled"),
            Some(ReservationStatus::Cancelled)
        );
        assert_eq!(ReservationStatus::parse("BOOKED"), None);
        assert_eq!(ReservationStatus::parse(""), None);
    }

    #[test]
    fn solo_completed_y_cancelled_son_terminales() {
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Confirmed.is_terminal());
    }

    #[test]
    fn patch_de_status_no_toca_otros_campos() {
        let mut rec = ReservationRecord {
            reservation_id: 7,
            guest_name: "Ana Pérez".to_string(),
            status: ReservationStatus::Confirmed,
            check_in_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
        };
        let before = rec.clone();

        ReservationPatch::status_only(ReservationStatus::Cancelled).apply(&mut rec);

        assert_eq!(rec.status, ReservationStatus::Cancelled);
        assert_eq!(rec.guest_name, before.guest_name);
        assert_eq!(rec.check_in_date, before.check_in_date);
        assert_eq!(rec.check_out_date, before.check_out_date);
    }
}
