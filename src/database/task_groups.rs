use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task_groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    pub name: String,

    #[sea_orm(nullable)]
    pub description: Option<String>,

    pub status: String, // 'active', 'disabled'

    /// Daily window bounds as HH:MM local to `timezone`. The window only
    /// applies when both are set.
    #[sea_orm(nullable)]
    pub start_time: Option<String>,

    #[sea_orm(nullable)]
    pub end_time: Option<String>,

    pub timezone: String,

    /// 'started' or 'stopped' when a manual override is in force; overrides
    /// win over the time window and are cleared by any group update.
    #[sea_orm(nullable)]
    pub manual_override: Option<String>,

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
    #[sea_orm(has_many = "super::tasks::Entity")]
    Tasks,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tasks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Active,
    Disabled,
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupStatus::Active => write!(f, "active"),
            GroupStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl From<String> for GroupStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "disabled" => GroupStatus::Disabled,
            _ => GroupStatus::Active,
        }
    }
}

impl GroupStatus {
    /// Strict parse for API input ('ACTIVE' / 'DISABLED').
    pub fn parse_api(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(GroupStatus::Active),
            "disabled" => Some(GroupStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ManualOverride {
    Started,
    Stopped,
}

impl std::fmt::Display for ManualOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManualOverride::Started => write!(f, "started"),
            ManualOverride::Stopped => write!(f, "stopped"),
        }
    }
}

impl ManualOverride {
    pub fn from_column(value: &Option<String>) -> Option<Self> {
        match value.as_deref() {
            Some("started") => Some(ManualOverride::Started),
            Some("stopped") => Some(ManualOverride::Stopped),
            _ => None,
        }
    }
}
