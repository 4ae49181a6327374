use sea_orm_migration::prelude::*;

mod m20250210_000001_create_projects_table;
mod m20250210_000002_create_task_groups_table;
mod m20250210_000003_create_tasks_table;
mod m20250211_000001_create_executions_table;
mod m20250211_000002_create_execution_logs_table;
mod m20250211_000003_create_execution_stats_table;
mod m20250212_000001_create_delete_queue_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250210_000001_create_projects_table::Migration),
            Box::new(m20250210_000002_create_task_groups_table::Migration),
            Box::new(m20250210_000003_create_tasks_table::Migration),
            Box::new(m20250211_000001_create_executions_table::Migration),
            Box::new(m20250211_000002_create_execution_logs_table::Migration),
            Box::new(m20250211_000003_create_execution_stats_table::Migration),
            Box::new(m20250212_000001_create_delete_queue_table::Migration),
        ]
    }
}
