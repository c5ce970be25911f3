pub mod report;
pub mod reservation;
pub mod row;
pub mod store;
pub mod task;
pub mod validation;
pub mod worker;

pub use reservation::{ReservationId, ReservationPatch, ReservationRecord, ReservationStatus};
pub use row::{parse_row, CandidateRecord, Cell, Field, RawRow};
pub use store::{Notifier, ReservationStore, StoreError, TaskStore};
pub use task::{
    MessageResponse, RowError, SubmitResponse, Task, TaskId, TaskMessage, TaskPatch, TaskStatus,
    TaskStatusView, TaskUpdate,
};
pub use validation::{validate, FailureKind};
pub use worker::{
    QueuePollRequest, QueuePollResponse, QueueSettleRequest, QueueSettleResponse, WorkerHeartbeatRequest,
    WorkerHeartbeatResponse, WorkerId, WorkerRegisterRequest, WorkerRegisterResponse,
};

/// Header con la clave compartida que exige la API.
pub const API_KEY_HEADER: &str = "x-api-key";
