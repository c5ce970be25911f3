//! Endpoints que usa el worker: registro, cola, almacenamiento y
//! notificaciones. También exigen la API key.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    QueuePollRequest, QueuePollResponse, QueueSettleRequest, QueueSettleResponse, ReservationId,
    ReservationPatch, ReservationRecord, ReservationStore, StoreError, Task, TaskPatch, TaskStore,
    TaskUpdate, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerRegisterRequest,
    WorkerRegisterResponse,
};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::queue::Redelivery;
use crate::state::{lock, AppState, WorkerMeta};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/internal/workers/register", post(register_worker))
        .route("/internal/workers/heartbeat", post(worker_heartbeat))
        .route("/internal/workers/deregister", post(deregister_worker))
        .route("/internal/queue/next", post(next_message))
        .route("/internal/queue/ack", post(ack_message))
        .route("/internal/queue/nack", post(nack_message))
        .route("/internal/tasks", post(create_task))
        .route("/internal/tasks/:task_id", get(get_task).patch(update_task))
        .route("/internal/reservations", post(create_reservation))
        .route(
            "/internal/reservations/:reservation_id",
            get(get_reservation).patch(update_reservation),
        )
        .route("/internal/notifications", post(publish_notification))
}

/* ---------------- workers ---------------- */

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = uuid::Uuid::new_v4().to_string();

    lock(&state.workers).insert(
        worker_id.clone(),
        WorkerMeta {
            hostname: req.hostname.clone(),
            last_heartbeat: SystemTime::now(),
            dead: false,
        },
    );

    info!("worker registrado: {} ({})", worker_id, req.hostname);
    Json(WorkerRegisterResponse { worker_id })
}

// Un heartbeat de un worker marcado muerto lo revive.
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Json<WorkerHeartbeatResponse> {
    let mut workers = lock(&state.workers);
    let ok = match workers.get_mut(&req.worker_id) {
        Some(meta) => {
            if meta.dead {
                info!("worker {} volvió a dar señales de vida", req.worker_id);
            }
            meta.last_heartbeat = SystemTime::now();
            meta.dead = false;
            true
        }
        None => false,
    };
    Json(WorkerHeartbeatResponse { ok })
}

async fn deregister_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Json<WorkerHeartbeatResponse> {
    let known = lock(&state.workers).remove(&req.worker_id).is_some();
    let exhausted = lock(&state.queue).release_worker(&req.worker_id);

    info!("worker {} dado de baja", req.worker_id);
    for message in &exhausted {
        state.fail_undeliverable(message).await;
    }
    Json(WorkerHeartbeatResponse { ok: known })
}

/* ---------------- cola ---------------- */

async fn next_message(
    State(state): State<AppState>,
    Json(req): Json<QueuePollRequest>,
) -> Json<QueuePollResponse> {
    let known = lock(&state.workers).contains_key(&req.worker_id);
    if !known {
        warn!("worker desconocido {} pidió un mensaje", req.worker_id);
        return Json(QueuePollResponse { message: None });
    }

    let message = lock(&state.queue).next(&req.worker_id);
    match &message {
        Some(m) => info!("entregando tarea {} al worker {}", m.task_id, req.worker_id),
        None => debug!("worker {} pidió mensaje pero la cola está vacía", req.worker_id),
    }
    Json(QueuePollResponse { message })
}

async fn ack_message(
    State(state): State<AppState>,
    Json(req): Json<QueueSettleRequest>,
) -> Json<QueueSettleResponse> {
    let ok = lock(&state.queue).ack(&req.worker_id, &req.task_id);
    debug!("ack de {} por {} (ok={})", req.task_id, req.worker_id, ok);
    Json(QueueSettleResponse { ok })
}

async fn nack_message(
    State(state): State<AppState>,
    Json(req): Json<QueueSettleRequest>,
) -> Json<QueueSettleResponse> {
    let outcome = lock(&state.queue).nack(&req.worker_id, &req.task_id);

    let ok = match outcome {
        Some(Redelivery::Requeued) => {
            info!("tarea {} devuelta a la cola", req.task_id);
            true
        }
        Some(Redelivery::Exhausted(message)) => {
            state.fail_undeliverable(&message).await;
            true
        }
        None => false,
    };
    Json(QueueSettleResponse { ok })
}

/* ---------------- almacenamiento ---------------- */

async fn create_task(
    State(state): State<AppState>,
    Json(task): Json<Task>,
) -> Result<StatusCode, ApiError> {
    state.tasks.create(task).await?;
    Ok(StatusCode::CREATED)
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.tasks.find_one(&task_id).await?;
    task.map(Json)
        .ok_or(ApiError::Store(StoreError::NotFound(task_id)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    let task = state.tasks.update_one(&task_id, patch).await?;
    Ok(Json(task))
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(record): Json<ReservationRecord>,
) -> Result<StatusCode, ApiError> {
    state.reservations.create(record).await?;
    Ok(StatusCode::CREATED)
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
) -> Result<Json<ReservationRecord>, ApiError> {
    state
        .reservations
        .find_one(reservation_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::Store(StoreError::NotFound(reservation_id.to_string())))
}

async fn update_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    Json(patch): Json<ReservationPatch>,
) -> Result<StatusCode, ApiError> {
    state.reservations.update_one(reservation_id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

/* ---------------- notificaciones ---------------- */

async fn publish_notification(
    State(state): State<AppState>,
    Json(update): Json<TaskUpdate>,
) -> StatusCode {
    debug!("notificación de {}: {:?}", update.task_id, update.status);
    state.publish(update);
    StatusCode::NO_CONTENT
}
