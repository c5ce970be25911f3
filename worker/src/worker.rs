use anyhow::Result;
use common::TaskMessage;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::processor::{ProcessOutcome, ProcessorError, TaskProcessor};
use crate::remote::{MasterClient, QueueClient};

/// Loop principal del worker.
/// - Se registra en el master (abre la cola).
/// - Hace heartbeats periódicos en segundo plano.
/// - Pide mensajes de a uno y procesa cada tarea hasta el final.
/// - Al recibir Ctrl-C se da de baja; lo que estaba en vuelo vuelve a la cola.
pub async fn run(config: WorkerConfig) -> Result<()> {
    let master = MasterClient::new(&config);
    let queue = Arc::new(QueueClient::open(master.clone()).await?);

    info!(
        "worker {} contra {} (batch_size={})",
        queue.worker_id(),
        config.master_url,
        config.batch_size
    );

    let master = Arc::new(master);
    let processor = TaskProcessor::new(
        master.clone(),
        master.clone(),
        master.clone(),
        config.batch_size,
    );

    let heartbeat = spawn_heartbeat(queue.clone(), config.heartbeat_interval);

    tokio::select! {
        _ = poll_loop(&queue, &processor, config.poll_interval) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("señal de apagado recibida");
        }
    }

    heartbeat.abort();
    if let Err(e) = queue.close().await {
        warn!("no se pudo dar de baja el worker: {}", e);
    }
    Ok(())
}

fn spawn_heartbeat(queue: Arc<QueueClient>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(every).await;
            match queue.heartbeat().await {
                Ok(true) => debug!("heartbeat enviado"),
                Ok(false) => warn!("el master no reconoce al worker {}", queue.worker_id()),
                Err(e) => warn!("heartbeat fallido: {}", e),
            }
        }
    })
}

async fn poll_loop(queue: &QueueClient, processor: &TaskProcessor, idle: Duration) {
    loop {
        match queue.next().await {
            Ok(Some(msg)) => handle(queue, processor, msg).await,
            Ok(None) => {
                debug!("no hay mensajes, esperando {:?}...", idle);
                sleep(idle).await;
            }
            Err(e) => {
                warn!("error pidiendo mensajes al master: {}", e);
                sleep(idle).await;
            }
        }
    }
}

async fn handle(queue: &QueueClient, processor: &TaskProcessor, msg: TaskMessage) {
    info!("tengo tarea {} (archivo={})", msg.task_id, msg.file_path);

    let settled = match processor.process(&msg).await {
        Ok(outcome) => {
            match &outcome {
                ProcessOutcome::Completed(summary) => info!(
                    "tarea {} terminada: {} filas, {} errores",
                    msg.task_id, summary.processed_rows, summary.errors
                ),
                ProcessOutcome::Failed { reason } => {
                    warn!("tarea {} terminó en FAILED: {}", msg.task_id, reason)
                }
                ProcessOutcome::AlreadyFinished(status) => {
                    info!("tarea {} ya estaba en {:?}", msg.task_id, status)
                }
            }
            queue.ack(&msg.task_id).await
        }
        Err(ProcessorError::UnknownTask(id)) => {
            // Sin documento no hay a quién reportar: se descarta el mensaje
            warn!("mensaje para la tarea desconocida {}, se descarta", id);
            queue.ack(&msg.task_id).await
        }
        Err(e) => {
            warn!("no se pudo cerrar la tarea {}: {}, se devuelve a la cola", msg.task_id, e);
            queue.nack(&msg.task_id).await
        }
    };

    if let Err(e) = settled {
        warn!("no se pudo confirmar el mensaje de {}: {}", msg.task_id, e);
    }
}
