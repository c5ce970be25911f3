use common::{ReservationId, RowError, StoreError};
use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use crate::reconcile::Reconciliation;

pub type ReconcileFuture = BoxFuture<'static, Result<Reconciliation, StoreError>>;

/// Operación diferida de reconciliación para una fila.
pub struct ReconcileOp {
    pub row: u64,
    pub reservation_id: ReservationId,
    pub future: ReconcileFuture,
}

/// Resultado de ejecutar un lote completo.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub size: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Rechazos de reconciliación, con la misma forma que los de validación.
    pub errors: Vec<RowError>,
    /// Primer fallo de almacenamiento no disponible del lote. No es un error
    /// de fila: quien ejecuta el lote debe abortar la tarea.
    pub unavailable: Option<StoreError>,
}

/// Agrupa operaciones y las ejecuta concurrentemente en lotes de `batch_size`.
///
/// `push` no devuelve el control hasta que el lote lleno terminó entero, así
/// que el stream de filas queda pausado mientras hay `batch_size` operaciones
/// en vuelo.
pub struct BatchExecutor {
    batch_size: usize,
    pending: Vec<ReconcileOp>,
    batch_sizes: Vec<usize>,
}

impl BatchExecutor {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            batch_sizes: Vec::new(),
        }
    }

    /// Tamaño de cada lote ejecutado, en orden.
    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encola una operación. Si ya hay otra para la misma reserva en el lote
    /// actual, primero se ejecuta el lote; si el lote se llena, se ejecuta.
    pub async fn push(&mut self, op: ReconcileOp) -> Option<BatchOutcome> {
        if self
            .pending
            .iter()
            .any(|p| p.reservation_id == op.reservation_id)
        {
            debug!(
                "reserva {} repetida en el lote (fila {}), se adelanta la ejecución",
                op.reservation_id, op.row
            );
            let outcome = self.flush().await;
            self.pending.push(op);
            return outcome;
        }

        self.pending.push(op);
        if self.pending.len() >= self.batch_size {
            return self.flush().await;
        }
        None
    }

    /// Ejecuta lo que quede pendiente (lote parcial final).
    pub async fn flush(&mut self) -> Option<BatchOutcome> {
        if self.pending.is_empty() {
            return None;
        }

        let ops = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let size = ops.len();

        let results = join_all(
            ops.into_iter()
                .map(|op| async move { (op.row, op.future.await) }),
        )
        .await;

        let mut outcome = BatchOutcome {
            size,
            ..BatchOutcome::default()
        };

        for (row, result) in results {
            match result {
                Ok(Reconciliation::Created) => outcome.created += 1,
                Ok(Reconciliation::Updated) => outcome.updated += 1,
                Ok(Reconciliation::Skipped) => outcome.skipped += 1,
                Err(e @ StoreError::Unavailable(_)) => {
                    warn!("fila {}: almacenamiento no disponible: {}", row, e);
                    outcome.unavailable.get_or_insert(e);
                }
                Err(e) => {
                    warn!("fila {}: falló la reconciliación: {}", row, e);
                    outcome
                        .errors
                        .push(RowError::for_row(row, format!("No se pudo guardar la reserva: {}", e)));
                }
            }
        }

        self.batch_sizes.push(size);
        debug!(
            "lote {} ejecutado: {} ops (creadas={}, actualizadas={}, omitidas={}, fallidas={})",
            self.batch_sizes.len(),
            size,
            outcome.created,
            outcome.updated,
            outcome.skipped,
            outcome.errors.len()
        );

        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn op(row: u64, id: ReservationId, done: &Arc<AtomicUsize>) -> ReconcileOp {
        let done = done.clone();
        ReconcileOp {
            row,
            reservation_id: id,
            future: async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(Reconciliation::Created)
            }
            .boxed(),
        }
    }

    fn failing_op(row: u64, id: ReservationId, error: StoreError) -> ReconcileOp {
        ReconcileOp {
            row,
            reservation_id: id,
            future: async move { Err::<Reconciliation, _>(error) }.boxed(),
        }
    }

    #[tokio::test]
    async fn lotes_de_dos_con_cinco_filas() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut exec = BatchExecutor::new(2);

        let mut outcomes = Vec::new();
        for i in 1..=5u64 {
            if let Some(o) = exec.push(op(i + 1, i, &done)).await {
                outcomes.push(o);
            }
        }
        if let Some(o) = exec.flush().await {
            outcomes.push(o);
        }

        assert_eq!(exec.batch_sizes(), &[2, 2, 1]);
        assert_eq!(outcomes.iter().map(|o| o.size).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn push_espera_el_lote_completo() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut exec = BatchExecutor::new(2);

        assert!(exec.push(op(2, 1, &done)).await.is_none());
        assert_eq!(done.load(Ordering::SeqCst), 0);

        let outcome = exec.push(op(3, 2, &done)).await.unwrap();
        assert_eq!(outcome.size, 2);
        assert_eq!(done.load(Ordering::SeqCst), 2);

        assert!(exec.push(op(4, 3, &done)).await.is_none());
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(exec.pending_len(), 1);
    }

    #[tokio::test]
    async fn un_fallo_no_aborta_a_sus_hermanos() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut exec = BatchExecutor::new(3);

        exec.push(op(2, 1, &done)).await;
        exec.push(failing_op(3, 2, StoreError::Duplicate("2".to_string())))
            .await;
        let outcome = exec.push(op(4, 3, &done)).await.unwrap();

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, Some(3));
        assert!(outcome.errors[0].error.contains("ya existe"));
        assert!(outcome.unavailable.is_none());
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn almacenamiento_caido_no_es_error_de_fila() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut exec = BatchExecutor::new(3);

        exec.push(failing_op(2, 1, StoreError::Unavailable("timeout".to_string())))
            .await;
        exec.push(op(3, 2, &done)).await;
        let outcome = exec
            .push(failing_op(4, 3, StoreError::Unavailable("otra".to_string())))
            .await
            .unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(
            outcome.unavailable,
            Some(StoreError::Unavailable("timeout".to_string()))
        );
        // el hermano sano termina igual
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misma_reserva_no_comparte_lote() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut exec = BatchExecutor::new(10);

        assert!(exec.push(op(2, 7, &done)).await.is_none());
        assert!(exec.push(op(3, 8, &done)).await.is_none());
        let early = exec.push(op(4, 7, &done)).await.unwrap();
        assert_eq!(early.size, 2);
        assert_eq!(exec.pending_len(), 1);

        exec.flush().await;
        assert_eq!(exec.batch_sizes(), &[2, 1]);
    }

    #[tokio::test]
    async fn flush_vacio_no_ejecuta_nada() {
        let mut exec = BatchExecutor::new(0);
        assert!(exec.flush().await.is_none());
        assert!(exec.batch_sizes().is_empty());
    }
}
