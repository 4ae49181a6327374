use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable FIFO decoupling the delete API from scheduler/persistence cleanup.
/// Rows are claimed with a visibility timeout and removed on ack; repeated
/// failures park them as dead letters.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delete_queue")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    pub project_id: Uuid,

    pub requested_at: DateTimeUtc,

    pub status: String, // 'pending', 'processing', 'dead_letter'

    pub attempts: i32,

    pub max_attempts: i32,

    /// The message is invisible to consumers until this instant.
    pub visible_at: DateTimeUtc,

    #[sea_orm(nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMessageStatus {
    Pending,
    Processing,
    DeadLetter,
}

impl std::fmt::Display for DeleteMessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteMessageStatus::Pending => write!(f, "pending"),
            DeleteMessageStatus::Processing => write!(f, "processing"),
            DeleteMessageStatus::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

impl From<String> for DeleteMessageStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => DeleteMessageStatus::Processing,
            "dead_letter" => DeleteMessageStatus::DeadLetter,
            _ => DeleteMessageStatus::Pending,
        }
    }
}
