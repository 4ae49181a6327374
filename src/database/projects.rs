use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    pub api_key: String,

    #[sea_orm(nullable)]
    pub execution_endpoint: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub alert_emails: AlertEmails,

    #[sea_orm(column_type = "JsonBinary")]
    pub project_users: ProjectUsers,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tasks::Entity", on_delete = "Cascade")]
    Tasks,
    #[sea_orm(has_many = "super::task_groups::Entity", on_delete = "Cascade")]
    TaskGroups,
    #[sea_orm(has_many = "super::execution_stats::Entity", on_delete = "Cascade")]
    ExecutionStats,
}

impl Related<super::tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tasks.def()
    }
}

impl Related<super::task_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TaskGroups.def()
    }
}

impl Related<super::execution_stats::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionStats.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct AlertEmails(pub Vec<String>);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ProjectUsers(pub Vec<ProjectUser>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUser {
    pub email: String,
    pub role: ProjectRole,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Admin,
    Readonly,
}

/// Project API keys are 32 random bytes, hex encoded.
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}
