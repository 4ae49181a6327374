use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // No FK to tasks: the queue outlives the row it deletes.
        manager
            .create_table(
                Table::create()
                    .table(DeleteQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeleteQueue::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeleteQueue::TaskId).uuid().not_null())
                    .col(ColumnDef::new(DeleteQueue::ProjectId).uuid().not_null())
                    .col(
                        ColumnDef::new(DeleteQueue::RequestedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeleteQueue::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(DeleteQueue::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DeleteQueue::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(DeleteQueue::VisibleAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeleteQueue::LastError).string().null())
                    .col(
                        ColumnDef::new(DeleteQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeleteQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_delete_queue_status_visible")
                    .table(DeleteQueue::Table)
                    .col(DeleteQueue::Status)
                    .col(DeleteQueue::VisibleAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeleteQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeleteQueue {
    Table,
    Id,
    TaskId,
    ProjectId,
    RequestedAt,
    Status,
    Attempts,
    MaxAttempts,
    VisibleAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
