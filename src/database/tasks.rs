use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    #[sea_orm(nullable)]
    pub task_group_id: Option<Uuid>,

    pub name: String,

    #[sea_orm(nullable)]
    pub description: Option<String>,

    pub schedule_type: String, // 'recurring', 'oneoff'

    #[sea_orm(column_type = "JsonBinary")]
    pub schedule_config: ScheduleConfig,

    #[sea_orm(column_type = "JsonBinary")]
    pub trigger_config: TriggerConfig,

    pub status: String, // 'active', 'disabled', 'pending_delete', 'delete_failed'

    #[sea_orm(nullable)]
    pub timeout_seconds: Option<i64>,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id"
    )]
    Project,
    #[sea_orm(
        belongs_to = "super::task_groups::Entity",
        from = "Column::TaskGroupId",
        to = "super::task_groups::Column::Id"
    )]
    TaskGroup,
    #[sea_orm(has_many = "super::executions::Entity", on_delete = "Cascade")]
    Executions,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::task_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TaskGroup.def()
    }
}

impl Related<super::executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Executions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// When and where a task fires. `cron_expression` is required while the task
/// is active; the remaining fields narrow the firings produced by it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ScheduleConfig {
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// ISO weekday numbers, Monday = 1 through Sunday = 7.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
    /// Calendar dates (in `timezone`) on which firings are suppressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusions: Option<Vec<NaiveDate>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String, // HH:MM
    pub end: String,   // HH:MM
}

/// Tagged trigger variant. The core only understands HTTP today; the tag is
/// the extension point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(tag = "type")]
pub enum TriggerConfig {
    #[serde(rename = "HTTP")]
    Http { http: HttpTrigger },
}

/// The executor interprets this config; the core stores it opaquely apart
/// from URL/method validation on write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpTrigger {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Disabled,
    PendingDelete,
    DeleteFailed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Disabled => write!(f, "disabled"),
            TaskStatus::PendingDelete => write!(f, "pending_delete"),
            TaskStatus::DeleteFailed => write!(f, "delete_failed"),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "disabled" => TaskStatus::Disabled,
            "pending_delete" => TaskStatus::PendingDelete,
            "delete_failed" => TaskStatus::DeleteFailed,
            _ => TaskStatus::Active,
        }
    }
}

impl TaskStatus {
    /// Strict parse for API input; only the user-settable pair is accepted.
    pub fn parse_user_settable(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(TaskStatus::Active),
            "disabled" => Some(TaskStatus::Disabled),
            _ => None,
        }
    }

    /// PENDING_DELETE rejects every further user mutation.
    pub fn accepts_user_mutations(&self) -> bool {
        !matches!(self, TaskStatus::PendingDelete)
    }

    pub fn as_api(&self) -> String {
        self.to_string().to_uppercase()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    Recurring,
    Oneoff,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Recurring => write!(f, "recurring"),
            ScheduleType::Oneoff => write!(f, "oneoff"),
        }
    }
}

impl From<String> for ScheduleType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "oneoff" => ScheduleType::Oneoff,
            _ => ScheduleType::Recurring,
        }
    }
}

impl ScheduleType {
    pub fn parse_api(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "recurring" => Some(ScheduleType::Recurring),
            "oneoff" => Some(ScheduleType::Oneoff),
            _ => None,
        }
    }
}
