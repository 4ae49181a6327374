use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::delete_queue::{self, DeleteMessageStatus};
use crate::error::{ObserverError, Result};

const CLAIM_RETRY_ATTEMPTS: u32 = 3;

/// Durable FIFO between the delete API and the delete worker, backed by the
/// `delete_queue` table. At-least-once: a claim only hides the message for
/// the visibility timeout; unacked messages become claimable again, and
/// repeated failures park them as dead letters.
pub struct DeleteQueue {
    db: Arc<DatabaseConnection>,
    visibility_timeout_secs: i64,
    max_attempts: i32,
}

impl DeleteQueue {
    pub fn new(db: Arc<DatabaseConnection>, visibility_timeout_secs: i64, max_attempts: i32) -> Self {
        Self {
            db,
            visibility_timeout_secs,
            max_attempts,
        }
    }

    /// Insert a message on the caller's connection so enqueueing can share a
    /// transaction with the status flip to PENDING_DELETE.
    pub async fn enqueue<C: ConnectionTrait>(
        &self,
        conn: &C,
        task_id: Uuid,
        project_id: Uuid,
    ) -> Result<delete_queue::Model> {
        let now = Utc::now();
        let message = delete_queue::ActiveModel {
            id: Set(Uuid::now_v7()),
            task_id: Set(task_id),
            project_id: Set(project_id),
            requested_at: Set(now),
            status: Set(DeleteMessageStatus::Pending.to_string()),
            attempts: Set(0),
            max_attempts: Set(self.max_attempts),
            visible_at: Set(now),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = message.insert(conn).await?;
        tracing::info!(task_id = %task_id, message_id = %model.id, "Enqueued delete message");
        Ok(model)
    }

    /// Claim the oldest visible message, hiding it for the visibility
    /// timeout. The claim is an optimistic compare-and-set on `updated_at`;
    /// concurrent consumers simply retry against the next candidate.
    pub async fn poll(&self) -> Result<Option<delete_queue::Model>> {
        for _ in 0..CLAIM_RETRY_ATTEMPTS {
            let now = Utc::now();
            let candidate = delete_queue::Entity::find()
                .filter(delete_queue::Column::Status.is_in([
                    DeleteMessageStatus::Pending.to_string(),
                    DeleteMessageStatus::Processing.to_string(),
                ]))
                .filter(delete_queue::Column::VisibleAt.lte(now))
                .order_by_asc(delete_queue::Column::CreatedAt)
                .one(&*self.db)
                .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let claimed_until = now + ChronoDuration::seconds(self.visibility_timeout_secs);
            let result = delete_queue::Entity::update_many()
                .col_expr(
                    delete_queue::Column::Status,
                    Expr::value(DeleteMessageStatus::Processing.to_string()),
                )
                .col_expr(delete_queue::Column::VisibleAt, Expr::value(claimed_until))
                .col_expr(delete_queue::Column::UpdatedAt, Expr::value(now))
                .filter(delete_queue::Column::Id.eq(candidate.id))
                .filter(delete_queue::Column::UpdatedAt.eq(candidate.updated_at))
                .exec(&*self.db)
                .await?;

            if result.rows_affected == 1 {
                let claimed = delete_queue::Entity::find_by_id(candidate.id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ObserverError::Internal(format!(
                            "Claimed delete message {} disappeared",
                            candidate.id
                        ))
                    })?;
                return Ok(Some(claimed));
            }
            // Lost the claim race; try the next candidate.
        }

        Ok(None)
    }

    /// Acknowledge successful processing. Idempotent: the row may already be
    /// gone after a redelivered duplicate.
    pub async fn ack(&self, message_id: Uuid) -> Result<()> {
        delete_queue::Entity::delete_by_id(message_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Report failed processing: bump the attempt counter and either make the
    /// message visible again or park it as a dead letter.
    pub async fn nack(&self, message_id: Uuid, error: &str) -> Result<()> {
        let Some(message) = delete_queue::Entity::find_by_id(message_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(());
        };

        let attempts = message.attempts + 1;
        let now = Utc::now();
        let mut active: delete_queue::ActiveModel = message.clone().into();
        active.attempts = Set(attempts);
        active.last_error = Set(Some(error.to_string()));
        active.updated_at = Set(now);

        if attempts >= message.max_attempts {
            active.status = Set(DeleteMessageStatus::DeadLetter.to_string());
            tracing::error!(
                message_id = %message_id,
                task_id = %message.task_id,
                attempts = attempts,
                "Delete message moved to dead letter queue: {}",
                error
            );
        } else {
            active.status = Set(DeleteMessageStatus::Pending.to_string());
            active.visible_at = Set(now + ChronoDuration::seconds(self.visibility_timeout_secs));
            tracing::warn!(
                message_id = %message_id,
                task_id = %message.task_id,
                attempts = attempts,
                "Delete message nacked, will redeliver: {}",
                error
            );
        }

        active.update(&*self.db).await?;
        Ok(())
    }

    pub async fn visible_count(&self) -> Result<u64> {
        let count = delete_queue::Entity::find()
            .filter(delete_queue::Column::Status.eq(DeleteMessageStatus::Pending.to_string()))
            .count(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn dead_letters(&self) -> Result<Vec<delete_queue::Model>> {
        let rows = delete_queue::Entity::find()
            .filter(delete_queue::Column::Status.eq(DeleteMessageStatus::DeadLetter.to_string()))
            .order_by_asc(delete_queue::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}
