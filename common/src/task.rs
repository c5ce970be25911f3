use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::FailureKind;

pub type TaskId = String;

/// Mensaje que viaja por la cola: qué tarea procesar y dónde está su archivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Las transiciones sólo avanzan. `InProgress -> InProgress` se permite
    /// para que un mensaje reentregado pueda volver a arrancar la tarea.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

/// Error de una fila concreta (validación o reconciliación), o el error
/// global de la tarea cuando `row` es `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureKind>,
}

impl RowError {
    pub const MESSAGE_SEPARATOR: &'static str = "; ";

    pub fn from_failures(row: u64, failures: Vec<FailureKind>) -> Self {
        let error = failures
            .iter()
            .map(|f| f.message())
            .collect::<Vec<_>>()
            .join(Self::MESSAGE_SEPARATOR);
        Self {
            row: Some(row),
            error,
            failures,
        }
    }

    pub fn for_row(row: u64, error: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            error: error.into(),
            failures: Vec::new(),
        }
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            row: None,
            error: error.into(),
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,
    pub file_path: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<RowError>,

    /// -------- Métricas de la tarea --------
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_rows: u64,
}

impl Task {
    pub fn new(task_id: TaskId, file_path: String) -> Self {
        Self {
            task_id,
            file_path,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
            processed_rows: 0,
        }
    }

    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.task_id.clone(),
            status: self.status,
            created_at: self.created_at,
            errors: self.errors.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            processed_rows: self.processed_rows,
        }
    }
}

/// Cambios parciales sobre una tarea (equivalente a un `updateOne`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<RowError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_rows: Option<u64>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn finish(status: TaskStatus, errors: Vec<RowError>, processed_rows: u64) -> Self {
        Self {
            status: Some(status),
            errors: Some(errors),
            processed_rows: Some(processed_rows),
        }
    }
}

/// Lo que ve un observador externo al consultar el estado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub errors: Vec<RowError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed_rows: u64,
}

/// Evento publicado en el canal de notificaciones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_rows: Option<u64>,
}

impl TaskUpdate {
    pub fn new(task_id: impl Into<TaskId>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            processed_rows: None,
        }
    }

    pub fn progress(task_id: impl Into<TaskId>, processed_rows: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::InProgress,
            processed_rows: Some(processed_rows),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
