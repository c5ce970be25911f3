use crate::state::{lock, AppState};
use common::WorkerId;
use std::time::{Duration, SystemTime};
use tracing::info;

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

pub async fn monitor_workers(state: AppState) {
    loop {
        tokio::time::sleep(MONITOR_INTERVAL).await;
        check_workers(&state, SystemTime::now()).await;
    }
}

/// Marca muertos a los workers sin heartbeat reciente y reencola lo que
/// tenían en vuelo. Los mensajes sin entregas restantes hacen FAILED su tarea.
pub async fn check_workers(state: &AppState, now: SystemTime) {
    let timeout = state.config.worker_dead_timeout;

    // Detectar workers muertos
    let dead_workers: Vec<WorkerId> = {
        let mut workers = lock(&state.workers);
        let mut dead = Vec::new();
        for (id, meta) in workers.iter_mut() {
            if meta.dead {
                continue;
            }
            if let Ok(elapsed) = now.duration_since(meta.last_heartbeat) {
                if elapsed > timeout {
                    meta.dead = true;
                    info!("marcando worker {} ({}) como muerto", id, meta.hostname);
                    dead.push(id.clone());
                }
            }
        }
        dead
    };

    if dead_workers.is_empty() {
        return;
    }

    // Reencolar mensajes de esos workers
    let exhausted = {
        let mut queue = lock(&state.queue);
        let mut exhausted = Vec::new();
        for worker_id in &dead_workers {
            let in_flight = queue.in_flight_for(worker_id);
            if in_flight > 0 {
                info!(
                    "re-encolando {} mensaje(s) del worker muerto {}",
                    in_flight, worker_id
                );
            }
            exhausted.extend(queue.release_worker(worker_id));
        }
        exhausted
    };

    for message in &exhausted {
        state.fail_undeliverable(message).await;
    }
}
