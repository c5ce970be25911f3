//! Cola de tareas en memoria con entrega al menos una vez.
//!
//! Un mensaje entregado queda "en vuelo" hasta que su worker lo confirma
//! (ack). Si el worker lo rechaza (nack) o muere, vuelve a la cola mientras
//! no supere `max_attempts` entregas.

use common::{TaskId, TaskMessage, WorkerId};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct Queued {
    message: TaskMessage,
    deliveries: u32,
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub message: TaskMessage,
    pub worker_id: WorkerId,
    pub deliveries: u32,
}

/// Qué pasó con un mensaje que volvió del worker sin ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redelivery {
    Requeued,
    /// Se agotaron las entregas; el mensaje se descarta.
    Exhausted(TaskMessage),
}

#[derive(Debug)]
pub struct MessageQueue {
    pending: VecDeque<Queued>,
    in_flight: HashMap<TaskId, InFlight>,
    max_attempts: u32,
}

impl MessageQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn enqueue(&mut self, message: TaskMessage) {
        self.pending.push_back(Queued {
            message,
            deliveries: 0,
        });
    }

    /// Entrega el siguiente mensaje y lo deja en vuelo a nombre del worker.
    pub fn next(&mut self, worker_id: &str) -> Option<TaskMessage> {
        let queued = self.pending.pop_front()?;
        let message = queued.message.clone();
        self.in_flight.insert(
            message.task_id.clone(),
            InFlight {
                message: queued.message,
                worker_id: worker_id.to_string(),
                deliveries: queued.deliveries + 1,
            },
        );
        Some(message)
    }

    /// Confirma el mensaje. `false` si no estaba en vuelo para ese worker.
    pub fn ack(&mut self, worker_id: &str, task_id: &str) -> bool {
        match self.in_flight.get(task_id) {
            Some(entry) if entry.worker_id == worker_id => {
                self.in_flight.remove(task_id);
                true
            }
            _ => false,
        }
    }

    /// Devuelve el mensaje a la cola. `None` si no estaba en vuelo para ese
    /// worker.
    pub fn nack(&mut self, worker_id: &str, task_id: &str) -> Option<Redelivery> {
        match self.in_flight.get(task_id) {
            Some(entry) if entry.worker_id == worker_id => {}
            _ => return None,
        }
        let entry = self.in_flight.remove(task_id)?;
        Some(self.redeliver(entry))
    }

    /// Saca de vuelo todo lo que tenía el worker (muerto o dado de baja).
    /// Devuelve los mensajes que ya no se pueden reentregar.
    pub fn release_worker(&mut self, worker_id: &str) -> Vec<TaskMessage> {
        let task_ids: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.worker_id == worker_id)
            .map(|(task_id, _)| task_id.clone())
            .collect();

        let mut exhausted = Vec::new();
        for task_id in task_ids {
            if let Some(entry) = self.in_flight.remove(&task_id) {
                if let Redelivery::Exhausted(message) = self.redeliver(entry) {
                    exhausted.push(message);
                }
            }
        }
        exhausted
    }

    fn redeliver(&mut self, entry: InFlight) -> Redelivery {
        if entry.deliveries >= self.max_attempts {
            return Redelivery::Exhausted(entry.message);
        }
        self.pending.push_back(Queued {
            message: entry.message,
            deliveries: entry.deliveries,
        });
        Redelivery::Requeued
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_for(&self, worker_id: &str) -> usize {
        self.in_flight
            .values()
            .filter(|entry| entry.worker_id == worker_id)
            .count()
    }
}
