use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::database::executions::ExecutionStatus;

/// In-process pub/sub. Fan-out is bounded: a subscriber that falls more than
/// the channel capacity behind loses the oldest events and observes a
/// `Lagged` error, which consumers surface as a warning.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub event: ObserverEvent,
}

#[derive(Clone, Debug)]
pub enum ObserverEvent {
    TaskCreated {
        task_id: Uuid,
        project_id: Uuid,
    },
    TaskUpdated {
        task_id: Uuid,
        project_id: Uuid,
    },
    TaskStatusChanged {
        task_id: Uuid,
        project_id: Uuid,
        status: String,
    },
    /// May be published more than once per task; subscribers tolerate
    /// duplicates.
    TaskDeleted {
        task_id: Uuid,
    },
    ExecutionFinished {
        execution_id: Uuid,
        task_id: Uuid,
        project_id: Uuid,
        status: ExecutionStatus,
        scheduled_at: DateTime<Utc>,
    },
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ObserverEvent) {
        let envelope = EventEnvelope {
            id: Uuid::now_v7(),
            emitted_at: Utc::now(),
            event,
        };
        // A send error only means there is no subscriber right now.
        if let Err(e) = self.sender.send(envelope) {
            tracing::debug!("Event dropped, no subscribers: {:?}", e.0.event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
