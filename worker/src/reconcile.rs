use common::{ReservationPatch, ReservationRecord, ReservationStore, StoreError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Created,
    Updated,
    Skipped,
}

/// Decide crear, actualizar u omitir la reserva según lo que ya hay guardado.
///
/// - Estado entrante final (COMPLETED / CANCELLED): sólo se actualiza el
///   `status` de una reserva existente; si no existe no se crea nada.
/// - Cualquier otro estado: se crea, o se sobrescriben todos los campos salvo
///   que la reserva guardada ya esté en un estado final; entonces queda
///   congelada y se omite.
///
/// Es lectura y luego escritura, sin atomicidad entre filas concurrentes con
/// el mismo id; el `BatchExecutor` evita que caigan en el mismo lote.
pub async fn reconcile(
    store: &dyn ReservationStore,
    record: ReservationRecord,
) -> Result<Reconciliation, StoreError> {
    let existing = store.find_one(record.reservation_id).await?;

    if record.status.is_terminal() {
        return match existing {
            Some(_) => {
                store
                    .update_one(
                        record.reservation_id,
                        ReservationPatch::status_only(record.status),
                    )
                    .await?;
                Ok(Reconciliation::Updated)
            }
            None => Ok(Reconciliation::Skipped),
        };
    }

    match existing {
        Some(stored) if stored.status.is_terminal() => {
            debug!(
                "reserva {} ya está en {:?}, se omite la fila en {:?}",
                record.reservation_id, stored.status, record.status
            );
            Ok(Reconciliation::Skipped)
        }
        Some(_) => {
            store
                .update_one(record.reservation_id, ReservationPatch::overwrite(&record))
                .await?;
            Ok(Reconciliation::Updated)
        }
        None => {
            store.create(record).await?;
            Ok(Reconciliation::Created)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::store::memory::MemoryReservationStore;
    use common::ReservationStatus;

    fn record(id: u64, name: &str, status: ReservationStatus) -> ReservationRecord {
        ReservationRecord {
            reservation_id: id,
            guest_name: name.to_string(),
            status,
            check_in_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
        }
    }

    #[tokio::test]
    async fn crea_si_no_existe() {
        let store = MemoryReservationStore::new();
        let out = reconcile(&store, record(1, "Ana", ReservationStatus::Pending))
            .await
            .unwrap();

        assert_eq!(out, Reconciliation::Created);
        assert_eq!(store.get(1).unwrap().guest_name, "Ana");
    }

    #[tokio::test]
    async fn sobrescribe_todo_si_existe() {
        let store = MemoryReservationStore::new();
        store
            .create(record(1, "Ana", ReservationStatus::Pending))
            .await
            .unwrap();

        let mut incoming = record(1, "Ana María", ReservationStatus::Confirmed);
        incoming.check_out_date = NaiveDate::from_ymd_opt(2024, 5, 9).unwrap();
        let out = reconcile(&store, incoming.clone()).await.unwrap();

        assert_eq!(out, Reconciliation::Updated);
        assert_eq!(store.get(1).unwrap(), incoming);
    }

    #[tokio::test]
    async fn estado_final_sin_registro_previo_se_omite() {
        let store = MemoryReservationStore::new();
        let out = reconcile(&store, record(5, "Bob", ReservationStatus::Cancelled))
            .await
            .unwrap();

        assert_eq!(out, Reconciliation::Skipped);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reserva_terminada_no_vuelve_atras() {
        let store = MemoryReservationStore::new();
        let original = record(1, "Ana", ReservationStatus::Completed);
        store.create(original.clone()).await.unwrap();

        let out = reconcile(&store, record(1, "Otro", ReservationStatus::Pending))
            .await
            .unwrap();

        assert_eq!(out, Reconciliation::Skipped);
        assert_eq!(store.get(1).unwrap(), original);
    }

    #[tokio::test]
    async fn reserva_terminada_acepta_otro_estado_final() {
        let store = MemoryReservationStore::new();
        store
            .create(record(2, "Ana", ReservationStatus::Completed))
            .await
            .unwrap();

        let out = reconcile(&store, record(2, "Otro", ReservationStatus::Cancelled))
            .await
            .unwrap();

        let stored = store.get(2).unwrap();
        assert_eq!(out, Reconciliation::Updated);
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(stored.guest_name, "Ana");
    }

    #[tokio::test]
    async fn estado_final_solo_cambia_el_status() {
        let store = MemoryReservationStore::new();
        let original = record(5, "Bob", ReservationStatus::Confirmed);
        store.create(original.clone()).await.unwrap();

        let out = reconcile(&store, record(5, "Otro Nombre", ReservationStatus::Completed))
            .await
            .unwrap();

        let stored = store.get(5).unwrap();
        assert_eq!(out, Reconciliation::Updated);
        assert_eq!(stored.status, ReservationStatus::Completed);
        assert_eq!(stored.guest_name, original.guest_name);
    }
}
