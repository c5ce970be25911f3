//! Procesamiento de una tarea: del archivo subido a las reservas guardadas.
//!
//! Estados: PENDING -> IN_PROGRESS -> COMPLETED, o IN_PROGRESS -> FAILED si
//! algo falla fuera del tratamiento de una fila (archivo ilegible, CSV dañado,
//! almacenamiento caído). Los errores de una fila nunca detienen la tarea.

use common::{
    parse_row, validate, Notifier, ReservationRecord, ReservationStore, RowError, StoreError,
    TaskMessage, TaskPatch, TaskStatus, TaskStore, TaskUpdate,
};
use futures::FutureExt;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::{BatchExecutor, BatchOutcome, ReconcileOp};
use crate::reconcile::reconcile;
use crate::source::{RowStream, SourceError};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("la tarea {0} no existe")]
    UnknownTask(String),
    #[error("no se pudo guardar el estado de la tarea {task_id}: {source}")]
    Store {
        task_id: String,
        #[source]
        source: StoreError,
    },
}

/// Fallo que aborta la tarea completa.
#[derive(Debug, Error)]
enum JobError {
    #[error("{0}")]
    Source(#[from] SourceError),
    #[error("{0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub processed_rows: u64,
    pub errors: usize,
    /// Tamaño de cada lote ejecutado, en orden.
    pub batches: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(JobSummary),
    Failed { reason: String },
    /// La tarea ya había terminado (mensaje reentregado).
    AlreadyFinished(TaskStatus),
}

/// Acumulado en memoria mientras dura una tarea.
#[derive(Default)]
struct JobRun {
    errors: Vec<RowError>,
    processed_rows: u64,
}

impl JobRun {
    /// Errores en orden de fila; el error global (sin fila) va al final.
    fn sorted_errors(&mut self) -> Vec<RowError> {
        self.errors.sort_by_key(|e| e.row.unwrap_or(u64::MAX));
        self.errors.clone()
    }
}

pub struct TaskProcessor {
    tasks: Arc<dyn TaskStore>,
    reservations: Arc<dyn ReservationStore>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
}

impl TaskProcessor {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        reservations: Arc<dyn ReservationStore>,
        notifier: Arc<dyn Notifier>,
        batch_size: usize,
    ) -> Self {
        Self {
            tasks,
            reservations,
            notifier,
            batch_size: batch_size.max(1),
        }
    }

    /// Procesa el mensaje hasta dejar la tarea en un estado final.
    ///
    /// Sólo devuelve `Err` si la tarea no existe o si ni siquiera se pudo
    /// guardar el estado FAILED; en ese caso el mensaje debe reentregarse.
    pub async fn process(&self, msg: &TaskMessage) -> Result<ProcessOutcome, ProcessorError> {
        let task = self
            .tasks
            .find_one(&msg.task_id)
            .await
            .map_err(|source| ProcessorError::Store {
                task_id: msg.task_id.clone(),
                source,
            })?
            .ok_or_else(|| ProcessorError::UnknownTask(msg.task_id.clone()))?;

        if task.status.is_terminal() {
            info!(
                "tarea {} ya estaba en {:?}, se ignora el mensaje",
                task.task_id, task.status
            );
            return Ok(ProcessOutcome::AlreadyFinished(task.status));
        }

        info!("procesando tarea {} ({})", msg.task_id, msg.file_path);
        let start = Instant::now();
        let mut run = JobRun::default();

        match self.run(msg, &mut run).await {
            Ok(summary) => {
                info!(
                    "tarea {} completada: {} filas procesadas, {} errores, {} lotes en {:.2?}",
                    msg.task_id,
                    summary.processed_rows,
                    summary.errors,
                    summary.batches.len(),
                    start.elapsed()
                );
                self.notify(TaskUpdate::new(&msg.task_id, TaskStatus::Completed))
                    .await;
                Ok(ProcessOutcome::Completed(summary))
            }
            Err(e) => self.fail(&msg.task_id, run, e).await,
        }
    }

    async fn run(&self, msg: &TaskMessage, run: &mut JobRun) -> Result<JobSummary, JobError> {
        self.tasks
            .update_one(&msg.task_id, TaskPatch::status(TaskStatus::InProgress))
            .await?;
        self.notify(TaskUpdate::new(&msg.task_id, TaskStatus::InProgress))
            .await;

        let mut rows = RowStream::open(&msg.file_path);
        let mut executor = BatchExecutor::new(self.batch_size);

        while let Some(item) = rows.next().await {
            let row = item?;
            if row.is_header() || row.is_blank() {
                continue;
            }

            match validate(&parse_row(&row)) {
                Err(failures) => {
                    debug!("fila {} inválida: {:?}", row.number, failures);
                    run.errors.push(RowError::from_failures(row.number, failures));
                }
                Ok(record) => {
                    run.processed_rows += 1;
                    let op = self.reconcile_op(row.number, record);
                    if let Some(outcome) = executor.push(op).await {
                        self.after_batch(&msg.task_id, run, outcome).await?;
                    }
                }
            }
        }

        if let Some(outcome) = executor.flush().await {
            self.after_batch(&msg.task_id, run, outcome).await?;
        }

        let processed_rows = run.processed_rows;
        let errors = run.sorted_errors();
        let error_count = errors.len();

        self.tasks
            .update_one(
                &msg.task_id,
                TaskPatch::finish(TaskStatus::Completed, errors, processed_rows),
            )
            .await?;

        Ok(JobSummary {
            processed_rows,
            errors: error_count,
            batches: executor.batch_sizes().to_vec(),
        })
    }

    fn reconcile_op(&self, row: u64, record: ReservationRecord) -> ReconcileOp {
        let store = self.reservations.clone();
        let reservation_id = record.reservation_id;
        ReconcileOp {
            row,
            reservation_id,
            future: async move { reconcile(store.as_ref(), record).await }.boxed(),
        }
    }

    /// Acumula los errores de fila del lote. Si el almacenamiento no estuvo
    /// disponible la tarea entera falla.
    async fn after_batch(
        &self,
        task_id: &str,
        run: &mut JobRun,
        outcome: BatchOutcome,
    ) -> Result<(), JobError> {
        run.errors.extend(outcome.errors);
        if let Some(e) = outcome.unavailable {
            return Err(JobError::Store(e));
        }
        self.notify(TaskUpdate::progress(task_id, run.processed_rows))
            .await;
        Ok(())
    }

    async fn fail(
        &self,
        task_id: &str,
        mut run: JobRun,
        cause: JobError,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let reason = format!("Error al procesar el archivo: {}", cause);
        warn!("tarea {} fallida: {}", task_id, reason);

        // Se conservan los errores de fila acumulados antes del fallo
        let processed_rows = run.processed_rows;
        let mut errors = run.sorted_errors();
        errors.push(RowError::fatal(reason.clone()));

        match self
            .tasks
            .update_one(
                task_id,
                TaskPatch::finish(TaskStatus::Failed, errors, processed_rows),
            )
            .await
        {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                info!("tarea {} ya estaba en {:?}", task_id, from);
                return Ok(ProcessOutcome::AlreadyFinished(from));
            }
            Err(source) => {
                return Err(ProcessorError::Store {
                    task_id: task_id.to_string(),
                    source,
                })
            }
        }

        self.notify(TaskUpdate::new(task_id, TaskStatus::Failed)).await;
        Ok(ProcessOutcome::Failed { reason })
    }

    /// Best effort: un fallo al notificar sólo se registra.
    async fn notify(&self, update: TaskUpdate) {
        if let Err(e) = self.notifier.publish(update.clone()).await {
            warn!(
                "no se pudo notificar {:?} de la tarea {}: {}",
                update.status, update.task_id, e
            );
        }
    }
}
