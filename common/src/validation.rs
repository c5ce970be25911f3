//! Reglas de validación de una fila de reservas.
//!
//! Cada campo tiene su propia función que devuelve el valor válido o el tipo
//! de fallo; `validate` las compone y junta todos los fallos de la fila.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::reservation::{ReservationId, ReservationRecord, ReservationStatus};
use crate::row::{CandidateRecord, Field};

/// Sugerencia cuando el error no corresponde a ningún fallo conocido.
pub const DEFAULT_SUGGESTION: &str = "Revise que los datos de la fila sean correctos.";

/// Vocabulario cerrado de fallos de validación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    ReservationIdRequired,
    ReservationIdNotNumeric,
    GuestNameRequired,
    StatusRequired,
    StatusInvalid,
    CheckInDateRequired,
    CheckInDateInvalid,
    CheckOutDateRequired,
    CheckOutDateInvalid,
}

impl FailureKind {
    pub const ALL: [FailureKind; 9] = [
        FailureKind::ReservationIdRequired,
        FailureKind::ReservationIdNotNumeric,
        FailureKind::GuestNameRequired,
        FailureKind::StatusRequired,
        FailureKind::StatusInvalid,
        FailureKind::CheckInDateRequired,
        FailureKind::CheckInDateInvalid,
        FailureKind::CheckOutDateRequired,
        FailureKind::CheckOutDateInvalid,
    ];

    pub fn message(self) -> &'static str {
        match self {
            FailureKind::ReservationIdRequired => "El ID de la reserva es obligatorio",
            FailureKind::ReservationIdNotNumeric => "El ID de la reserva debe ser un número",
            FailureKind::GuestNameRequired => "El nombre del huésped es obligatorio",
            FailureKind::StatusRequired => "El estado de la reserva es obligatorio",
            FailureKind::StatusInvalid => "Estado de reserva no válido",
            FailureKind::CheckInDateRequired => "La fecha de entrada es obligatoria",
            FailureKind::CheckInDateInvalid => "Formato de fecha de entrada no válido",
            FailureKind::CheckOutDateRequired => "La fecha de salida es obligatoria",
            FailureKind::CheckOutDateInvalid => "Formato de fecha de salida no válido",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            FailureKind::ReservationIdRequired => "Indique el ID numérico de la reserva.",
            FailureKind::ReservationIdNotNumeric => {
                "Use sólo dígitos en el ID de la reserva (número entero positivo)."
            }
            FailureKind::GuestNameRequired => "Complete el nombre y apellido del huésped.",
            FailureKind::StatusRequired => "Indique el estado de la reserva.",
            FailureKind::StatusInvalid => {
                "Revise el estado de la reserva (PENDING, CONFIRMED, COMPLETED o CANCELLED)."
            }
            FailureKind::CheckInDateRequired => "Complete la fecha de entrada.",
            FailureKind::CheckInDateInvalid => {
                "Corrija el formato de la fecha de entrada (AAAA-MM-DD) y verifique que esté completa."
            }
            FailureKind::CheckOutDateRequired => "Complete la fecha de salida.",
            FailureKind::CheckOutDateInvalid => {
                "Corrija el formato de la fecha de salida (AAAA-MM-DD) y verifique que esté completa."
            }
        }
    }

    /// Busca el fallo cuyo mensaje coincide exactamente con `message`.
    pub fn from_message(message: &str) -> Option<FailureKind> {
        Self::ALL.into_iter().find(|k| k.message() == message)
    }
}

pub fn validate_reservation_id(field: &Field<ReservationId>) -> Result<ReservationId, FailureKind> {
    match field {
        Field::Value(id) => Ok(*id),
        Field::Invalid(_) => Err(FailureKind::ReservationIdNotNumeric),
        Field::Missing => Err(FailureKind::ReservationIdRequired),
    }
}

pub fn validate_guest_name(field: &Field<String>) -> Result<String, FailureKind> {
    match field {
        Field::Value(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => Err(FailureKind::GuestNameRequired),
    }
}

pub fn validate_status(field: &Field<String>) -> Result<ReservationStatus, FailureKind> {
    match field {
        Field::Value(text) if text.trim().is_empty() => Err(FailureKind::StatusRequired),
        Field::Value(text) => ReservationStatus::parse(text).ok_or(FailureKind::StatusInvalid),
        Field::Invalid(_) => Err(FailureKind::StatusInvalid),
        Field::Missing => Err(FailureKind::StatusRequired),
    }
}

fn validate_date(
    field: &Field<NaiveDate>,
    required: FailureKind,
    invalid: FailureKind,
) -> Result<NaiveDate, FailureKind> {
    match field {
        Field::Value(d) => Ok(*d),
        Field::Invalid(_) => Err(invalid),
        Field::Missing => Err(required),
    }
}

pub fn validate_check_in(field: &Field<NaiveDate>) -> Result<NaiveDate, FailureKind> {
    validate_date(
        field,
        FailureKind::CheckInDateRequired,
        FailureKind::CheckInDateInvalid,
    )
}

pub fn validate_check_out(field: &Field<NaiveDate>) -> Result<NaiveDate, FailureKind> {
    validate_date(
        field,
        FailureKind::CheckOutDateRequired,
        FailureKind::CheckOutDateInvalid,
    )
}

/// Valida el registro candidato completo. Todos los campos se evalúan, así
/// que una fila con varios problemas devuelve todos sus fallos.
pub fn validate(candidate: &CandidateRecord) -> Result<ReservationRecord, Vec<FailureKind>> {
    let reservation_id = validate_reservation_id(&candidate.reservation_id);
    let guest_name = validate_guest_name(&candidate.guest_name);
    let status = validate_status(&candidate.status);
    let check_in_date = validate_check_in(&candidate.check_in_date);
    let check_out_date = validate_check_out(&candidate.check_out_date);

    match (reservation_id, guest_name, status, check_in_date, check_out_date) {
        (Ok(reservation_id), Ok(guest_name), Ok(status), Ok(check_in_date), Ok(check_out_date)) => {
            Ok(ReservationRecord {
                reservation_id,
                guest_name,
                status,
                check_in_date,
                check_out_date,
            })
        }
        (id, name, status, check_in, check_out) => {
            let failures = [
                id.err(),
                name.err(),
                status.err(),
                check_in.err(),
                check_out.err(),
            ];
            Err(failures.into_iter().flatten().collect())
        }
    }
}
