//! Reporte de errores descargable: una fila por error con su sugerencia.

use thiserror::Error;

use crate::task::RowError;
use crate::validation::{FailureKind, DEFAULT_SUGGESTION};

pub const NO_ERRORS_MESSAGE: &str = "No hubo errores al procesar el archivo.";
pub const REPORT_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const REPORT_HEADER: [&str; 3] = ["Número de fila", "Motivo del error", "Sugerencia de corrección"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("error al escribir el reporte: {0}")]
    Csv(#[from] csv::Error),
    #[error("error al finalizar el reporte: {0}")]
    Finish(String),
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Sugerencia para una entrada de error.
///
/// Primero usa los fallos guardados con la entrada; si no hay, intenta
/// reconocer el texto exacto del error, y si tampoco, la sugerencia genérica.
pub fn suggestion_for(error: &RowError) -> String {
    if !error.failures.is_empty() {
        let mut seen: Vec<FailureKind> = Vec::new();
        for kind in &error.failures {
            if !seen.contains(kind) {
                seen.push(*kind);
            }
        }
        return seen
            .iter()
            .map(|k| k.suggestion())
            .collect::<Vec<_>>()
            .join(" ");
    }

    FailureKind::from_message(&error.error)
        .map(|k| k.suggestion())
        .unwrap_or(DEFAULT_SUGGESTION)
        .to_string()
}

pub fn report_file_name(task_id: &str) -> String {
    format!("reporte_errores_{}.csv", task_id)
}

/// Genera el reporte. Sin errores no hay documento: devuelve `None`.
pub fn render(task_id: &str, errors: &[RowError]) -> Result<Option<ErrorReport>, ReportError> {
    if errors.is_empty() {
        return Ok(None);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADER)?;

    for e in errors {
        let row = e
            .row
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let suggestion = suggestion_for(e);
        writer.write_record([row.as_str(), e.error.as_str(), suggestion.as_str()])?;
    }

    let content = writer
        .into_inner()
        .map_err(|e| ReportError::Finish(e.to_string()))?;

    Ok(Some(ErrorReport {
        file_name: report_file_name(task_id),
        content,
    }))
}
