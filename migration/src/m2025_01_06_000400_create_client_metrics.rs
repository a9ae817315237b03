//! Creates the client_metrics table holding weekly and monthly aggregates.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientMetrics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientMetrics::ClientId).uuid().not_null())
                    .col(ColumnDef::new(ClientMetrics::PeriodType).text().not_null())
                    .col(ColumnDef::new(ClientMetrics::PeriodStart).date().not_null())
                    .col(ColumnDef::new(ClientMetrics::PeriodEnd).date().not_null())
                    .col(
                        ColumnDef::new(ClientMetrics::Impressions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::Clicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::Spend)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::Conversions)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::ConversionValue)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::Sessions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::Users)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::PageViews)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ClientMetrics::Ctr).double().null())
                    .col(ColumnDef::new(ClientMetrics::Cpc).double().null())
                    .col(ColumnDef::new(ClientMetrics::Cpa).double().null())
                    .col(ColumnDef::new(ClientMetrics::ConversionRate).double().null())
                    .col(ColumnDef::new(ClientMetrics::Roas).double().null())
                    .col(
                        ColumnDef::new(ClientMetrics::SourceRecordCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ClientMetrics::Platforms).json_binary().not_null())
                    .col(
                        ColumnDef::new(ClientMetrics::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_client_metrics_client_id")
                            .from(ClientMetrics::Table, ClientMetrics::ClientId)
                            .to(Clients::Table, Clients::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_client_metrics_client_period")
                    .table(ClientMetrics::Table)
                    .col(ClientMetrics::ClientId)
                    .col(ClientMetrics::PeriodType)
                    .col(ClientMetrics::PeriodStart)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_client_metrics_client_period")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ClientMetrics::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClientMetrics {
    Table,
    Id,
    ClientId,
    PeriodType,
    PeriodStart,
    PeriodEnd,
    Impressions,
    Clicks,
    Spend,
    Conversions,
    ConversionValue,
    Sessions,
    Users,
    PageViews,
    Ctr,
    Cpc,
    Cpa,
    ConversionRate,
    Roas,
    SourceRecordCount,
    Platforms,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
}
