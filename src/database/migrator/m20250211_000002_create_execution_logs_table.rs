use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecutionLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::ExecutionId).uuid().not_null())
                    .col(
                        ColumnDef::new(ExecutionLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionLogs::Level)
                            .string()
                            .not_null()
                            .default("info"),
                    )
                    .col(ColumnDef::new(ExecutionLogs::Message).text().not_null())
                    .col(ColumnDef::new(ExecutionLogs::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(ExecutionLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_execution_logs_execution")
                            .from(ExecutionLogs::Table, ExecutionLogs::ExecutionId)
                            .to(Executions::Table, Executions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_execution_logs_execution_ts")
                    .table(ExecutionLogs::Table)
                    .col(ExecutionLogs::ExecutionId)
                    .col(ExecutionLogs::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExecutionLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExecutionLogs {
    Table,
    Id,
    ExecutionId,
    Timestamp,
    Level,
    Message,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Executions {
    Table,
    Id,
}
