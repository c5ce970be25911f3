//! Puertos hacia el almacenamiento de documentos y el canal de notificaciones.
//!
//! El worker los implementa sobre HTTP contra el master; el master y los
//! tests usan las implementaciones en memoria de [`memory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reservation::{ReservationId, ReservationPatch, ReservationRecord};
use crate::task::{Task, TaskPatch, TaskStatus, TaskUpdate};

/// Viaja tal cual en el cuerpo de las respuestas de error de los endpoints
/// internos, para que el worker recupere la variante original.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum StoreError {
    #[error("no existe el documento {0}")]
    NotFound(String),
    #[error("ya existe un documento con la clave {0}")]
    Duplicate(String),
    #[error("transición inválida de {from:?} a {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("almacenamiento no disponible: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_one(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    async fn create(&self, task: Task) -> Result<(), StoreError>;

    /// Aplica el patch y devuelve la tarea resultante.
    async fn update_one(&self, task_id: &str, patch: TaskPatch) -> Result<Task, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_one(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StoreError>;

    async fn create(&self, record: ReservationRecord) -> Result<(), StoreError>;

    async fn update_one(&self, id: ReservationId, patch: ReservationPatch) -> Result<(), StoreError>;
}

/// Canal de notificaciones hacia los observadores. Best effort: quien
/// publica ignora los errores.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, update: TaskUpdate) -> Result<(), StoreError>;
}

pub mod memory {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("lock envenenado".to_string())
    }

    /// Aplica un patch respetando que el estado sólo avance y sellando
    /// `started_at` / `finished_at`.
    pub fn apply_task_patch(task: &mut Task, patch: TaskPatch) -> Result<(), StoreError> {
        if let Some(next) = patch.status {
            if !task.status.can_advance_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: task.status,
                    to: next,
                });
            }
            if next == TaskStatus::InProgress && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            if next.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
            task.status = next;
        }
        if let Some(errors) = patch.errors {
            task.errors = errors;
        }
        if let Some(rows) = patch.processed_rows {
            task.processed_rows = rows;
        }
        Ok(())
    }

    #[derive(Default)]
    pub struct MemoryTaskStore {
        tasks: Mutex<HashMap<String, Task>>,
    }

    impl MemoryTaskStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TaskStore for MemoryTaskStore {
        async fn find_one(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
            let tasks = self.tasks.lock().map_err(poisoned)?;
            Ok(tasks.get(task_id).cloned())
        }

        async fn create(&self, task: Task) -> Result<(), StoreError> {
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            if tasks.contains_key(&task.task_id) {
                return Err(StoreError::Duplicate(task.task_id));
            }
            tasks.insert(task.task_id.clone(), task);
            Ok(())
        }

        async fn update_one(&self, task_id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
            apply_task_patch(task, patch)?;
            Ok(task.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryReservationStore {
        records: Mutex<HashMap<ReservationId, ReservationRecord>>,
    }

    impl MemoryReservationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.records.lock().map(|r| r.len()).unwrap_or(0)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, id: ReservationId) -> Option<ReservationRecord> {
            self.records.lock().ok().and_then(|r| r.get(&id).cloned())
        }
    }

    #[async_trait]
    impl ReservationStore for MemoryReservationStore {
        async fn find_one(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StoreError> {
            let records = self.records.lock().map_err(poisoned)?;
            Ok(records.get(&id).cloned())
        }

        async fn create(&self, record: ReservationRecord) -> Result<(), StoreError> {
            let mut records = self.records.lock().map_err(poisoned)?;
            if records.contains_key(&record.reservation_id) {
                return Err(StoreError::Duplicate(record.reservation_id.to_string()));
            }
            records.insert(record.reservation_id, record);
            Ok(())
        }

        async fn update_one(&self, id: ReservationId, patch: ReservationPatch) -> Result<(), StoreError> {
            let mut records = self.records.lock().map_err(poisoned)?;
            let record = records
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            patch.apply(record);
            Ok(())
        }
    }

    /// Guarda las notificaciones publicadas, en orden.
    #[derive(Default)]
    pub struct RecordingNotifier {
        updates: Mutex<Vec<TaskUpdate>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn updates(&self) -> Vec<TaskUpdate> {
            self.updates.lock().map(|u| u.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, update: TaskUpdate) -> Result<(), StoreError> {
            self.updates.lock().map_err(poisoned)?.push(update);
            Ok(())
        }
    }
}
