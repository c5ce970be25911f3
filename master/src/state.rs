use common::store::memory::{MemoryReservationStore, MemoryTaskStore};
use common::{RowError, TaskMessage, TaskPatch, TaskStatus, TaskStore, TaskUpdate, WorkerId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::MasterConfig;
use crate::queue::MessageQueue;

pub const DELIVERY_EXHAUSTED_MESSAGE: &str = "Se agotaron los reintentos de entrega";

const EVENTS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MasterConfig>,
    pub tasks: Arc<MemoryTaskStore>,
    pub reservations: Arc<MemoryReservationStore>,
    pub queue: Arc<Mutex<MessageQueue>>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
    // canal de notificaciones hacia los suscriptores SSE
    pub events: broadcast::Sender<TaskUpdate>,
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
}

/// Un lock envenenado no invalida los datos de la cola ni del registro de
/// workers, así que seguimos usándolos.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AppState {
    pub fn new(config: MasterConfig) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let max_attempts = config.max_delivery_attempts;
        Self {
            config: Arc::new(config),
            tasks: Arc::new(MemoryTaskStore::new()),
            reservations: Arc::new(MemoryReservationStore::new()),
            queue: Arc::new(Mutex::new(MessageQueue::new(max_attempts))),
            workers: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn enqueue(&self, message: TaskMessage) {
        lock(&self.queue).enqueue(message);
    }

    /// Sin suscriptores el envío falla; no es un error.
    pub fn publish(&self, update: TaskUpdate) {
        let _ = self.events.send(update);
    }

    /// Marca FAILED la tarea de un mensaje que agotó sus entregas, salvo que
    /// ya haya terminado.
    pub async fn fail_undeliverable(&self, message: &TaskMessage) {
        let task = match self.tasks.find_one(&message.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("mensaje agotado para la tarea desconocida {}", message.task_id);
                return;
            }
            Err(e) => {
                warn!("no se pudo leer la tarea {}: {}", message.task_id, e);
                return;
            }
        };

        if task.status.is_terminal() {
            info!(
                "tarea {} ya estaba en {:?}, se descarta el mensaje",
                task.task_id, task.status
            );
            return;
        }

        let mut errors = task.errors;
        errors.push(RowError::fatal(DELIVERY_EXHAUSTED_MESSAGE));
        let patch = TaskPatch::finish(TaskStatus::Failed, errors, task.processed_rows);

        match self.tasks.update_one(&task.task_id, patch).await {
            Ok(_) => {
                warn!("tarea {} marcada FAILED: entregas agotadas", task.task_id);
                self.publish(TaskUpdate::new(task.task_id, TaskStatus::Failed));
            }
            Err(e) => warn!("no se pudo marcar FAILED la tarea {}: {}", task.task_id, e),
        }
    }
}

#[cfg(test)]
pub fn test_config() -> MasterConfig {
    MasterConfig {
        addr: "127.0.0.1:0".to_string(),
        api_key: "clave".to_string(),
        upload_dir: std::env::temp_dir().join("master_uploads_tests"),
        max_upload_bytes: 1024,
        worker_dead_timeout: std::time::Duration::from_secs(20),
        max_delivery_attempts: 2,
    }
}
