use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait};
use sea_orm::ActiveModelTrait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::database::delete_queue;
use crate::database::execution_logs;
use crate::database::executions;
use crate::database::tasks::{self, TaskStatus};
use crate::delete::queue::DeleteQueue;
use crate::error::{ObserverError, Result};
use crate::events::{EventBus, ObserverEvent};
use crate::schedule::ScheduleEngine;

/// Drains the delete queue: unregisters the task from the scheduler, hard
/// deletes the task row with its executions and logs, and publishes
/// `TaskDeleted`. Every step tolerates repetition, so redelivered messages
/// converge on the same final state.
pub struct DeleteWorker {
    db: Arc<DatabaseConnection>,
    queue: Arc<DeleteQueue>,
    engine: Arc<ScheduleEngine>,
    bus: EventBus,
    poll_interval_ms: u64,
}

impl DeleteWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: Arc<DeleteQueue>,
        engine: Arc<ScheduleEngine>,
        bus: EventBus,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            db,
            queue,
            engine,
            bus,
            poll_interval_ms,
        }
    }

    /// Process one message to completion. Ok means the caller should ack;
    /// any error should be nacked for redelivery.
    pub async fn process(
        &self,
        message: &delete_queue::Model,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let task = tasks::Entity::find_by_id(message.task_id)
            .one(&*self.db)
            .await?;
        let Some(task) = task else {
            // Already deleted (likely a redelivered message); success.
            tracing::debug!(task_id = %message.task_id, "Task already deleted, acking");
            return Ok(());
        };

        // Cancellation short-circuits before the scheduler and persistence
        // steps; the nack that follows redelivers the message intact.
        if cancel.is_cancelled() {
            return Err(ObserverError::Cancelled);
        }

        self.engine.unregister(task.id).await;

        if let Err(e) = self.delete_task_rows(task.id).await {
            self.mark_delete_failed(task.id).await;
            return Err(e);
        }

        self.bus.publish(ObserverEvent::TaskDeleted { task_id: task.id });
        tracing::info!(task_id = %task.id, project_id = %message.project_id, "Task deleted");
        Ok(())
    }

    /// Hard delete the task and everything it owns in one transaction.
    async fn delete_task_rows(&self, task_id: uuid::Uuid) -> Result<()> {
        let txn = self.db.begin().await?;

        let execution_ids: Vec<uuid::Uuid> = executions::Entity::find()
            .filter(executions::Column::TaskId.eq(task_id))
            .select_only()
            .column(executions::Column::Id)
            .into_tuple()
            .all(&txn)
            .await?;

        if !execution_ids.is_empty() {
            execution_logs::Entity::delete_many()
                .filter(execution_logs::Column::ExecutionId.is_in(execution_ids))
                .exec(&txn)
                .await?;
            executions::Entity::delete_many()
                .filter(executions::Column::TaskId.eq(task_id))
                .exec(&txn)
                .await?;
        }

        tasks::Entity::delete_by_id(task_id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Best-effort observability marker; the nack that follows drives the
    /// actual retry.
    async fn mark_delete_failed(&self, task_id: uuid::Uuid) {
        let marker = tasks::ActiveModel {
            id: Set(task_id),
            status: Set(TaskStatus::DeleteFailed.to_string()),
            updated_at: Set(chrono::Utc::now()),
            ..Default::default()
        };
        if let Err(e) = marker.update(&*self.db).await {
            tracing::warn!(task_id = %task_id, "Could not mark task delete_failed: {}", e);
        }
    }

    /// Worker loop. Cancellation is honored between messages: a message in
    /// flight is always acked or nacked before exit.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let idle_wait = tokio::time::Duration::from_millis(self.poll_interval_ms);
        tracing::info!("Delete worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.queue.poll().await {
                Ok(Some(message)) => match self.process(&message, &cancel).await {
                    Ok(()) => {
                        if let Err(e) = self.queue.ack(message.id).await {
                            tracing::error!(message_id = %message.id, "Failed to ack delete message: {}", e);
                        }
                    }
                    Err(e) => {
                        if let Err(nack_err) = self.queue.nack(message.id, &e.to_string()).await {
                            tracing::error!(message_id = %message.id, "Failed to nack delete message: {}", nack_err);
                        }
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle_wait) => {}
                    }
                }
                Err(e) => {
                    tracing::error!("Delete queue poll failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle_wait) => {}
                    }
                }
            }
        }

        tracing::info!("Delete worker shutting down");
    }
}
