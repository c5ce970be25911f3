//! Clientes HTTP hacia el master: cola, almacenamiento y notificaciones.

use async_trait::async_trait;
use common::{
    Notifier, QueuePollRequest, QueuePollResponse, QueueSettleRequest, QueueSettleResponse,
    ReservationId, ReservationPatch, ReservationRecord, ReservationStore, StoreError, Task,
    TaskMessage, TaskPatch, TaskStore, TaskUpdate, WorkerHeartbeatRequest,
    WorkerHeartbeatResponse, WorkerId, WorkerRegisterRequest, WorkerRegisterResponse,
    API_KEY_HEADER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Cliente base: URL del master, API key y reintentos.
#[derive(Clone)]
pub struct MasterClient {
    http: Client,
    base_url: String,
    api_key: String,
    max_attempts: u32,
}

impl MasterClient {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.master_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_attempts: config.store_max_attempts.max(1),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Envía la petición reintentando errores de red y respuestas 5xx.
    /// Cualquier otra respuesta (incluidos 404 y 409) se devuelve tal cual.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let result = build(&self.http)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await;

            let failure = match result {
                Ok(resp) if !resp.status().is_server_error() => return Ok(resp),
                Ok(resp) => format!("el master respondió {}", resp.status()),
                Err(e) => format!("error HTTP: {}", e),
            };

            if attempt >= self.max_attempts {
                return Err(StoreError::Unavailable(failure));
            }
            warn!(
                "intento {}/{} fallido ({}), reintentando...",
                attempt, self.max_attempts, failure
            );
            sleep(RETRY_BASE_DELAY * attempt).await;
            attempt += 1;
        }
    }
}

/// Convierte una respuesta no exitosa en el `StoreError` que mandó el master.
async fn into_store_error(resp: Response) -> StoreError {
    let status = resp.status();
    match resp.json::<StoreError>().await {
        Ok(e) => e,
        Err(_) => StoreError::Unavailable(format!("el master respondió {}", status)),
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, StoreError> {
    if !resp.status().is_success() {
        return Err(into_store_error(resp).await);
    }
    resp.json::<T>()
        .await
        .map_err(|e| StoreError::Unavailable(format!("respuesta ilegible del master: {}", e)))
}

async fn read_optional<T: DeserializeOwned>(resp: Response) -> Result<Option<T>, StoreError> {
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    read_json(resp).await.map(Some)
}

async fn read_empty(resp: Response) -> Result<(), StoreError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(into_store_error(resp).await)
    }
}

#[async_trait]
impl TaskStore for MasterClient {
    async fn find_one(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let url = self.url(&format!("/internal/tasks/{}", task_id));
        let resp = self.send(|c| c.get(&url)).await?;
        read_optional(resp).await
    }

    async fn create(&self, task: Task) -> Result<(), StoreError> {
        let url = self.url("/internal/tasks");
        let resp = self.send(|c| c.post(&url).json(&task)).await?;
        read_empty(resp).await
    }

    async fn update_one(&self, task_id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
        let url = self.url(&format!("/internal/tasks/{}", task_id));
        let resp = self.send(|c| c.patch(&url).json(&patch)).await?;
        read_json(resp).await
    }
}

#[async_trait]
impl ReservationStore for MasterClient {
    async fn find_one(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StoreError> {
        let url = self.url(&format!("/internal/reservations/{}", id));
        let resp = self.send(|c| c.get(&url)).await?;
        read_optional(resp).await
    }

    async fn create(&self, record: ReservationRecord) -> Result<(), StoreError> {
        let url = self.url("/internal/reservations");
        let resp = self.send(|c| c.post(&url).json(&record)).await?;
        read_empty(resp).await
    }

    async fn update_one(&self, id: ReservationId, patch: ReservationPatch) -> Result<(), StoreError> {
        let url = self.url(&format!("/internal/reservations/{}", id));
        let resp = self.send(|c| c.patch(&url).json(&patch)).await?;
        read_empty(resp).await
    }
}

#[async_trait]
impl Notifier for MasterClient {
    async fn publish(&self, update: TaskUpdate) -> Result<(), StoreError> {
        let url = self.url("/internal/notifications");
        let resp = self.send(|c| c.post(&url).json(&update)).await?;
        read_empty(resp).await
    }
}

/// Handle de la cola de tareas. Se abre en `main` (registra el worker), se
/// pasa al loop y se cierra al apagar.
pub struct QueueClient {
    master: MasterClient,
    worker_id: WorkerId,
}

impl QueueClient {
    pub async fn open(master: MasterClient) -> Result<Self, StoreError> {
        let hostname = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let url = master.url("/internal/workers/register");
        let resp = master
            .send(|c| {
                c.post(&url).json(&WorkerRegisterRequest {
                    hostname: hostname.clone(),
                })
            })
            .await?;
        let WorkerRegisterResponse { worker_id } = read_json(resp).await?;

        info!("worker registrado con id = {} ({})", worker_id, hostname);
        Ok(Self { master, worker_id })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Pide el siguiente mensaje; `None` si la cola está vacía.
    pub async fn next(&self) -> Result<Option<TaskMessage>, StoreError> {
        let url = self.master.url("/internal/queue/next");
        let body = QueuePollRequest {
            worker_id: self.worker_id.clone(),
        };
        let resp = self.master.send(|c| c.post(&url).json(&body)).await?;
        let QueuePollResponse { message } = read_json(resp).await?;
        Ok(message)
    }

    pub async fn ack(&self, task_id: &str) -> Result<(), StoreError> {
        self.settle("/internal/queue/ack", task_id).await
    }

    /// Devuelve el mensaje a la cola para reentregarlo.
    pub async fn nack(&self, task_id: &str) -> Result<(), StoreError> {
        self.settle("/internal/queue/nack", task_id).await
    }

    async fn settle(&self, path: &str, task_id: &str) -> Result<(), StoreError> {
        let url = self.master.url(path);
        let body = QueueSettleRequest {
            worker_id: self.worker_id.clone(),
            task_id: task_id.to_string(),
        };
        let resp = self.master.send(|c| c.post(&url).json(&body)).await?;
        let QueueSettleResponse { ok } = read_json(resp).await?;
        if !ok {
            debug!("{} de {}: el mensaje ya no estaba en vuelo", path, task_id);
        }
        Ok(())
    }

    /// `false` si el master no reconoce a este worker.
    pub async fn heartbeat(&self) -> Result<bool, StoreError> {
        let url = self.master.url("/internal/workers/heartbeat");
        let body = WorkerHeartbeatRequest {
            worker_id: self.worker_id.clone(),
        };
        let resp = self.master.send(|c| c.post(&url).json(&body)).await?;
        let WorkerHeartbeatResponse { ok } = read_json(resp).await?;
        Ok(ok)
    }

    /// Da de baja al worker; lo que tuviera en vuelo vuelve a la cola.
    pub async fn close(&self) -> Result<(), StoreError> {
        let url = self.master.url("/internal/workers/deregister");
        let body = WorkerHeartbeatRequest {
            worker_id: self.worker_id.clone(),
        };
        let resp = self.master.send(|c| c.post(&url).json(&body)).await?;
        read_empty(resp).await?;
        info!("worker {} dado de baja", self.worker_id);
        Ok(())
    }
}
