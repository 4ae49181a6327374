pub mod delete_queue;
pub mod execution_logs;
pub mod execution_stats;
pub mod executions;
pub mod migrator;
pub mod projects;
pub mod task_groups;
pub mod tasks;

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

/// Connect and bring the schema up to date. Every caller (binary and tests)
/// goes through here, so migrations are never run separately.
pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    migrator::Migrator::up(&db, None).await?;
    Ok(db)
}
