use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskMessage};

pub type WorkerId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePollRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePollResponse {
    pub message: Option<TaskMessage>,
}

/// Confirmación (ack) o rechazo (nack) de un mensaje entregado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettleRequest {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettleResponse {
    pub ok: bool,
}
