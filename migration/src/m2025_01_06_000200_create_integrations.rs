//! Creates the integrations table.
//!
//! An integration is one client's configured connection to an advertising or
//! analytics platform. Credentials are stored sealed; the platform column keeps
//! the string identifier so rows written by other tools never break listing.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Integrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Integrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Integrations::ClientId).uuid().not_null())
                    .col(ColumnDef::new(Integrations::Platform).text().not_null())
                    .col(ColumnDef::new(Integrations::DisplayName).text().not_null())
                    .col(
                        ColumnDef::new(Integrations::CredentialsCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Integrations::Config).json_binary().not_null())
                    .col(
                        ColumnDef::new(Integrations::Status)
                            .text()
                            .not_null()
                            .default("inactive"),
                    )
                    .col(
                        ColumnDef::new(Integrations::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Integrations::LastError).text().null())
                    .col(
                        ColumnDef::new(Integrations::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Integrations::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(Integrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Integrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_integrations_client_id")
                            .from(Integrations::Table, Integrations::ClientId)
                            .to(Clients::Table, Clients::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_client_id")
                    .table(Integrations::Table)
                    .col(Integrations::ClientId)
                    .to_owned(),
            )
            .await?;

        // Daily sync scans by status
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_status")
                    .table(Integrations::Table)
                    .col(Integrations::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_integrations_status").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_integrations_client_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Integrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
    ClientId,
    Platform,
    DisplayName,
    CredentialsCiphertext,
    Config,
    Status,
    ConsecutiveFailures,
    LastError,
    LastSyncAt,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
}
