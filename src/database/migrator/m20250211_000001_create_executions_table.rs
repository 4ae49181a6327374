use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Executions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Executions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Executions::TaskId).uuid().not_null())
                    .col(ColumnDef::new(Executions::ProjectId).uuid().not_null())
                    .col(
                        ColumnDef::new(Executions::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Executions::TriggerType)
                            .string()
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(Executions::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Executions::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Executions::EndedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Executions::DurationMs).big_integer().null())
                    .col(ColumnDef::new(Executions::ResponseStatus).integer().null())
                    .col(ColumnDef::new(Executions::ErrorMessage).string().null())
                    .col(
                        ColumnDef::new(Executions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Executions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_executions_task")
                            .from(Executions::Table, Executions::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Dedup guarantee: at most one execution per (task, firing instant,
        // trigger type). The engine drops firings that violate it.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_executions_unique_firing")
                    .table(Executions::Table)
                    .col(Executions::TaskId)
                    .col(Executions::ScheduledAt)
                    .col(Executions::TriggerType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // SDK claim path: pending executions by task ordered by scheduled_at.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_executions_task_status_scheduled")
                    .table(Executions::Table)
                    .col(Executions::TaskId)
                    .col(Executions::Status)
                    .col(Executions::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_executions_project_scheduled")
                    .table(Executions::Table)
                    .col(Executions::ProjectId)
                    .col(Executions::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Executions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Executions {
    Table,
    Id,
    TaskId,
    ProjectId,
    Status,
    TriggerType,
    ScheduledAt,
    StartedAt,
    EndedAt,
    DurationMs,
    ResponseStatus,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
}
