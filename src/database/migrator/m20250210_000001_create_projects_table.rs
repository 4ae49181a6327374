use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Projects::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(ColumnDef::new(Projects::ApiKey).string().not_null())
                    .col(
                        ColumnDef::new(Projects::ExecutionEndpoint)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Projects::AlertEmails)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Projects::ProjectUsers)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Projects::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // API keys authenticate SDK calls; lookup must be unique and fast.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_projects_api_key")
                    .table(Projects::Table)
                    .col(Projects::ApiKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Name,
    ApiKey,
    ExecutionEndpoint,
    AlertEmails,
    ProjectUsers,
    CreatedAt,
    UpdatedAt,
}
