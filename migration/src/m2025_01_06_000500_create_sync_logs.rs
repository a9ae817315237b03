//! Creates the append-only sync_logs table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncLogs::IntegrationId).uuid().not_null())
                    .col(ColumnDef::new(SyncLogs::DateFrom).date().not_null())
                    .col(ColumnDef::new(SyncLogs::DateTo).date().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::RecordCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::Success).boolean().not_null())
                    .col(ColumnDef::new(SyncLogs::ErrorKind).text().null())
                    .col(ColumnDef::new(SyncLogs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncLogs::DurationMs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_logs_integration_id")
                            .from(SyncLogs::Table, SyncLogs::IntegrationId)
                            .to(Integrations::Table, Integrations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_integration_created")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::IntegrationId)
                    .col(SyncLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_logs_integration_created")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncLogs {
    Table,
    Id,
    IntegrationId,
    DateFrom,
    DateTo,
    RecordCount,
    Success,
    ErrorKind,
    ErrorMessage,
    DurationMs,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
}
