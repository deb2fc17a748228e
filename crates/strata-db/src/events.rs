use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Emitted once per unit after its batch has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    Applied { name: String, batch: i64 },
    RolledBack { name: String, batch: i64 },
}

impl MigrationEvent {
    pub fn name(&self) -> &str {
        match self {
            MigrationEvent::Applied { name, .. } | MigrationEvent::RolledBack { name, .. } => name,
        }
    }

    pub fn batch(&self) -> i64 {
        match self {
            MigrationEvent::Applied { batch, .. } | MigrationEvent::RolledBack { batch, .. } => {
                *batch
            }
        }
    }
}

/// Fan-out of migration events, one unbounded queue per subscriber.
/// Sending never blocks and never drops an event for a live subscriber, so a
/// batch of any size is delivered in full. Closed receivers are pruned on
/// the next send; dropping the bus ends every subscriber's stream.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MigrationEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MigrationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: MigrationEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            debug!("no event subscribers for {}", event.name());
        }
    }
}
