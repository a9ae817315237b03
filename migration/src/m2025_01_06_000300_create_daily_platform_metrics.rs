//! Creates the daily_platform_metrics table.
//!
//! One row per (integration, date, dimension). The empty dimension holds the
//! account-level total for the day.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DailyPlatformMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::IntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::Platform)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::MetricDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::Dimension)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(DailyPlatformMetrics::Impressions).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Clicks).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Spend).double().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Conversions).double().null())
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::ConversionValue)
                            .double()
                            .null(),
                    )
                    .col(ColumnDef::new(DailyPlatformMetrics::Reach).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Sessions).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Users).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::NewUsers).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::PageViews).big_integer().null())
                    .col(ColumnDef::new(DailyPlatformMetrics::Raw).json_binary().null())
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DailyPlatformMetrics::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // Deletion is explicit in the integration repository.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_daily_platform_metrics_integration_id")
                            .from(
                                DailyPlatformMetrics::Table,
                                DailyPlatformMetrics::IntegrationId,
                            )
                            .to(Integrations::Table, Integrations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_daily_platform_metrics_integration_date_dimension")
                    .table(DailyPlatformMetrics::Table)
                    .col(DailyPlatformMetrics::IntegrationId)
                    .col(DailyPlatformMetrics::MetricDate)
                    .col(DailyPlatformMetrics::Dimension)
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
                    .name("uq_daily_platform_metrics_integration_date_dimension")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(DailyPlatformMetrics::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DailyPlatformMetrics {
    Table,
    Id,
    IntegrationId,
    Platform,
    MetricDate,
    Dimension,
    Impressions,
    Clicks,
    Spend,
    Conversions,
    ConversionValue,
    Reach,
    Sessions,
    Users,
    NewUsers,
    PageViews,
    Raw,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
}
