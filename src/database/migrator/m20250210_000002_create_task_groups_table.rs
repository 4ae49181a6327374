use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TaskGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskGroups::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskGroups::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(TaskGroups::Name).string().not_null())
                    .col(ColumnDef::new(TaskGroups::Description).string().null())
                    .col(
                        ColumnDef::new(TaskGroups::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(TaskGroups::StartTime).string().null())
                    .col(ColumnDef::new(TaskGroups::EndTime).string().null())
                    .col(
                        ColumnDef::new(TaskGroups::Timezone)
                            .string()
                            .not_null()
                            .default("UTC"),
                    )
                    .col(ColumnDef::new(TaskGroups::ManualOverride).string().null())
                    .col(
                        ColumnDef::new(TaskGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TaskGroups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_groups_project")
                            .from(TaskGroups::Table, TaskGroups::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_groups_project")
                    .table(TaskGroups::Table)
                    .col(TaskGroups::ProjectId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskGroups::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TaskGroups {
    Table,
    Id,
    ProjectId,
    Name,
    Description,
    Status,
    StartTime,
    EndTime,
    Timezone,
    ManualOverride,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
