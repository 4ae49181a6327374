use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::database::execution_stats;
use crate::database::executions::ExecutionStatus;
use crate::error::{is_unique_violation, ObserverError, Result};
use crate::events::{EventBus, EventEnvelope, ObserverEvent};

pub const DEFAULT_STATS_DAYS: u64 = 7;
pub const MAX_STATS_DAYS: u64 = 90;

/// Rolls terminal execution statuses into per-project, per-day counters. The
/// bucket key is the UTC calendar day of `scheduled_at`.
pub struct FailureAggregator {
    db: Arc<DatabaseConnection>,
}

impl FailureAggregator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Atomic increment of the day's counters. The fast path is an in-place
    /// UPDATE; when the row does not exist yet we insert it, falling back to
    /// one more UPDATE if a concurrent insert wins the unique index race.
    pub async fn record(
        &self,
        project_id: Uuid,
        scheduled_at: DateTime<Utc>,
        status: ExecutionStatus,
    ) -> Result<()> {
        let (success_delta, failure_delta) = match status {
            ExecutionStatus::Success => (1i64, 0i64),
            ExecutionStatus::Failed => (0, 1),
            _ => return Ok(()),
        };
        let date = scheduled_at.date_naive().format("%Y-%m-%d").to_string();

        if self
            .increment(project_id, &date, success_delta, failure_delta)
            .await?
        {
            return Ok(());
        }

        let now = Utc::now();
        let row = execution_stats::ActiveModel {
            id: Set(Uuid::now_v7()),
            project_id: Set(project_id),
            date: Set(date.clone()),
            success: Set(success_delta),
            failures: Set(failure_delta),
            total: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match row.insert(&*self.db).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                if self
                    .increment(project_id, &date, success_delta, failure_delta)
                    .await?
                {
                    Ok(())
                } else {
                    Err(ObserverError::Internal(format!(
                        "Stats row for project {project_id} on {date} vanished during upsert"
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn increment(
        &self,
        project_id: Uuid,
        date: &str,
        success_delta: i64,
        failure_delta: i64,
    ) -> Result<bool> {
        let result = execution_stats::Entity::update_many()
            .col_expr(
                execution_stats::Column::Success,
                Expr::col(execution_stats::Column::Success).add(success_delta),
            )
            .col_expr(
                execution_stats::Column::Failures,
                Expr::col(execution_stats::Column::Failures).add(failure_delta),
            )
            .col_expr(
                execution_stats::Column::Total,
                Expr::col(execution_stats::Column::Total).add(1),
            )
            .col_expr(execution_stats::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(execution_stats::Column::ProjectId.eq(project_id))
            .filter(execution_stats::Column::Date.eq(date))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Most recent `days` rows, newest date first.
    pub async fn daily_stats(
        &self,
        project_id: Uuid,
        days: u64,
    ) -> Result<Vec<execution_stats::Model>> {
        let days = days.clamp(1, MAX_STATS_DAYS);
        let rows = execution_stats::Entity::find()
            .filter(execution_stats::Column::ProjectId.eq(project_id))
            .order_by_desc(execution_stats::Column::Date)
            .limit(days)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Bus subscriber loop. Lag means the bounded bus dropped events under
    /// load; counters then undercount, which is logged loudly.
    pub async fn run(self: Arc<Self>, bus: EventBus, cancel: CancellationToken) {
        let mut receiver = bus.subscribe();
        tracing::info!("Failure aggregator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Failure aggregator shutting down");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(envelope) => self.handle_event(&envelope).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Failure aggregator lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    pub async fn handle_event(&self, envelope: &EventEnvelope) {
        if let ObserverEvent::ExecutionFinished {
            execution_id,
            project_id,
            status,
            scheduled_at,
            ..
        } = &envelope.event
        {
            if let Err(e) = self.record(*project_id, *scheduled_at, *status).await {
                tracing::error!(
                    execution_id = %execution_id,
                    project_id = %project_id,
                    "Failed to record execution stats: {}",
                    e
                );
            }
        }
    }
}
