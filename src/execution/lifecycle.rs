use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::database::execution_logs::{self, LogLevel};
use crate::database::executions::{self, ExecutionStatus, TriggerType};
use crate::database::tasks;
use crate::error::{ObserverError, Result};
use crate::events::{EventBus, ObserverEvent};

/// Hard caps on the append-only log list.
pub const MAX_LOGS_PER_BATCH: usize = 1_000;
pub const MAX_LOGS_PER_EXECUTION: usize = 10_000;

#[derive(Debug, Default, Clone)]
pub struct StatusUpdate {
    pub error: Option<String>,
    pub response_status: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct LogEntryInput {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

/// Owns the execution state machine: creation, status transitions with
/// optimistic concurrency, log appends and the timeout watchdog. Terminal
/// transitions are published on the event bus for the stats roll-up.
pub struct LifecycleService {
    db: Arc<DatabaseConnection>,
    bus: EventBus,
}

impl LifecycleService {
    pub fn new(db: Arc<DatabaseConnection>, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub async fn create_execution(
        &self,
        task: &tasks::Model,
        trigger_type: TriggerType,
        scheduled_at: DateTime<Utc>,
    ) -> Result<executions::Model> {
        let now = Utc::now();
        let execution = executions::ActiveModel {
            id: Set(Uuid::now_v7()),
            task_id: Set(task.id),
            project_id: Set(task.project_id),
            status: Set(ExecutionStatus::Pending.to_string()),
            trigger_type: Set(trigger_type.to_string()),
            scheduled_at: Set(scheduled_at),
            started_at: Set(None),
            ended_at: Set(None),
            duration_ms: Set(None),
            response_status: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = execution.insert(&*self.db).await?;
        tracing::info!(
            execution_id = %model.id,
            task_id = %task.id,
            trigger_type = %trigger_type,
            scheduled_at = %scheduled_at,
            "Created execution"
        );
        Ok(model)
    }

    /// PENDING executions for a task, oldest firing first. Read-only: the
    /// executor transitions claims to RUNNING explicitly.
    pub async fn claim_pending(&self, task_id: Uuid, limit: u64) -> Result<Vec<executions::Model>> {
        let executions = executions::Entity::find()
            .filter(executions::Column::TaskId.eq(task_id))
            .filter(executions::Column::Status.eq(ExecutionStatus::Pending.to_string()))
            .order_by_asc(executions::Column::ScheduledAt)
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(executions)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<executions::Model>> {
        Ok(executions::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?)
    }

    pub async fn get_logs(&self, execution_id: Uuid) -> Result<Vec<execution_logs::Model>> {
        let logs = execution_logs::Entity::find()
            .filter(execution_logs::Column::ExecutionId.eq(execution_id))
            .order_by_asc(execution_logs::Column::Timestamp)
            .order_by_asc(execution_logs::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(logs)
    }

    /// Validate and apply a status transition. Optimistic: the UPDATE is
    /// predicated on the status we read; on a lost race we reload and retry
    /// exactly once.
    pub async fn update_status(
        &self,
        execution_id: Uuid,
        new_status: ExecutionStatus,
        update: StatusUpdate,
    ) -> Result<executions::Model> {
        let mut current = executions::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ObserverError::ExecutionNotFound(execution_id.to_string()))?;

        for _ in 0..2 {
            let from = ExecutionStatus::from(current.status.clone());
            if !from.can_transition_to(new_status) {
                return Err(ObserverError::InvalidStateTransition {
                    from: from.as_api(),
                    to: new_status.as_api(),
                });
            }

            let now = Utc::now();
            let mut query = executions::Entity::update_many()
                .col_expr(
                    executions::Column::Status,
                    Expr::value(new_status.to_string()),
                )
                .col_expr(executions::Column::UpdatedAt, Expr::value(now));

            if from == ExecutionStatus::Pending && new_status == ExecutionStatus::Running {
                query = query.col_expr(executions::Column::StartedAt, Expr::value(Some(now)));
            }
            if new_status.is_terminal() {
                query = query.col_expr(executions::Column::EndedAt, Expr::value(Some(now)));
                if let Some(started_at) = current.started_at {
                    query = query.col_expr(
                        executions::Column::DurationMs,
                        Expr::value(Some((now - started_at).num_milliseconds())),
                    );
                }
            }
            if let Some(code) = update.response_status {
                query = query.col_expr(executions::Column::ResponseStatus, Expr::value(Some(code)));
            }
            if new_status == ExecutionStatus::Failed {
                if let Some(error) = &update.error {
                    query = query.col_expr(
                        executions::Column::ErrorMessage,
                        Expr::value(Some(error.clone())),
                    );
                }
            }

            let result = query
                .filter(executions::Column::Id.eq(execution_id))
                .filter(executions::Column::Status.eq(current.status.clone()))
                .exec(&*self.db)
                .await?;

            if result.rows_affected == 1 {
                let updated = executions::Entity::find_by_id(execution_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ObserverError::ExecutionNotFound(execution_id.to_string()))?;

                tracing::info!(
                    execution_id = %execution_id,
                    from = %from,
                    to = %new_status,
                    "Execution status updated"
                );

                if new_status.is_terminal() {
                    self.bus.publish(ObserverEvent::ExecutionFinished {
                        execution_id: updated.id,
                        task_id: updated.task_id,
                        project_id: updated.project_id,
                        status: new_status,
                        scheduled_at: updated.scheduled_at,
                    });
                }
                return Ok(updated);
            }

            current = executions::Entity::find_by_id(execution_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ObserverError::ExecutionNotFound(execution_id.to_string()))?;
        }

        Err(ObserverError::Conflict(format!(
            "Concurrent status update on execution {execution_id}"
        )))
    }

    /// Append log entries, preserving caller timestamps. Terminal executions
    /// freeze their log list.
    pub async fn append_logs(
        &self,
        execution_id: Uuid,
        entries: Vec<LogEntryInput>,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        if entries.len() > MAX_LOGS_PER_BATCH {
            return Err(ObserverError::Validation(format!(
                "Log batch too large: {} entries (max {MAX_LOGS_PER_BATCH})",
                entries.len()
            )));
        }

        let execution = executions::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ObserverError::ExecutionNotFound(execution_id.to_string()))?;

        let status = ExecutionStatus::from(execution.status.clone());
        if status.is_terminal() {
            return Err(ObserverError::Conflict(format!(
                "Execution {execution_id} is {}; log list is frozen",
                status.as_api()
            )));
        }

        let existing = execution_logs::Entity::find()
            .filter(execution_logs::Column::ExecutionId.eq(execution_id))
            .count(&*self.db)
            .await? as usize;
        if existing + entries.len() > MAX_LOGS_PER_EXECUTION {
            return Err(ObserverError::Validation(format!(
                "Log limit exceeded for execution {execution_id}: {existing} stored, {} incoming (max {MAX_LOGS_PER_EXECUTION})",
                entries.len()
            )));
        }

        let now = Utc::now();
        let models: Vec<execution_logs::ActiveModel> = entries
            .into_iter()
            .map(|entry| execution_logs::ActiveModel {
                id: Set(Uuid::now_v7()),
                execution_id: Set(execution_id),
                timestamp: Set(entry.timestamp.unwrap_or(now)),
                level: Set(entry.level.to_string()),
                message: Set(entry.message),
                metadata: Set(entry.metadata),
                created_at: Set(now),
            })
            .collect();
        let appended = models.len();

        execution_logs::Entity::insert_many(models)
            .exec(&*self.db)
            .await?;

        Ok(appended)
    }

    /// Executions of one task, optionally narrowed to a UTC calendar day,
    /// newest firing first. Returns the page plus the unfiltered total.
    pub async fn list_task_executions(
        &self,
        task_id: Uuid,
        date: Option<NaiveDate>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<executions::Model>, u64)> {
        let mut query = executions::Entity::find().filter(executions::Column::TaskId.eq(task_id));

        if let Some(date) = date {
            let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"));
            let end = start + ChronoDuration::days(1);
            query = query
                .filter(executions::Column::ScheduledAt.gte(start))
                .filter(executions::Column::ScheduledAt.lt(end));
        }

        let paginator = query
            .order_by_desc(executions::Column::ScheduledAt)
            .paginate(&*self.db, page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Force RUNNING executions past their task's `timeout_seconds` to
    /// FAILED. Goes through the normal transition path, so the failure is
    /// published and counted.
    pub async fn fail_timed_out(&self, now: DateTime<Utc>) -> Result<usize> {
        let running = executions::Entity::find()
            .filter(executions::Column::Status.eq(ExecutionStatus::Running.to_string()))
            .all(&*self.db)
            .await?;

        let mut timeouts: HashMap<Uuid, Option<i64>> = HashMap::new();
        let mut failed = 0;

        for execution in running {
            let timeout = match timeouts.get(&execution.task_id) {
                Some(t) => *t,
                None => {
                    let t = tasks::Entity::find_by_id(execution.task_id)
                        .one(&*self.db)
                        .await?
                        .and_then(|task| task.timeout_seconds);
                    timeouts.insert(execution.task_id, t);
                    t
                }
            };
            let (Some(timeout), Some(started_at)) = (timeout, execution.started_at) else {
                continue;
            };

            if (now - started_at).num_seconds() > timeout {
                match self
                    .update_status(
                        execution.id,
                        ExecutionStatus::Failed,
                        StatusUpdate {
                            error: Some("timeout".to_string()),
                            response_status: None,
                        },
                    )
                    .await
                {
                    Ok(_) => {
                        failed += 1;
                        tracing::warn!(
                            execution_id = %execution.id,
                            task_id = %execution.task_id,
                            timeout_seconds = timeout,
                            "Execution timed out, forced to failed"
                        );
                    }
                    // The executor raced us to a terminal state; its report wins.
                    Err(ObserverError::InvalidStateTransition { .. }) => {}
                    Err(e) => {
                        tracing::error!(execution_id = %execution.id, "Failed to time out execution: {}", e);
                    }
                }
            }
        }

        Ok(failed)
    }

    pub async fn run_watchdog(self: Arc<Self>, interval_secs: u64, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Execution watchdog shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.fail_timed_out(Utc::now()).await {
                        Ok(0) => {}
                        Ok(count) => tracing::warn!("Watchdog failed {} timed out executions", count),
                        Err(e) => tracing::error!("Execution watchdog error: {}", e),
                    }
                }
            }
        }
    }
}
