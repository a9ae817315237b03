//! Daily platform metric repository
//!
//! Rows are upserted on `(integration_id, metric_date, dimension)`; a re-sync
//! of a day overwrites it with the platform's current figures.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set, sea_query::OnConflict,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::daily_platform_metric::{self, ACCOUNT_DIMENSION, Entity as DailyPlatformMetric};
use crate::models::integration;
use crate::platforms::DailyMetric;

#[derive(Debug, Clone)]
pub struct DailyMetricRepository {
    db: Arc<DatabaseConnection>,
}

impl DailyMetricRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_for_integration(
        &self,
        integration_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<daily_platform_metric::Model>> {
        let rows = DailyPlatformMetric::find()
            .filter(daily_platform_metric::Column::IntegrationId.eq(integration_id))
            .filter(daily_platform_metric::Column::MetricDate.between(from, to))
            .order_by_asc(daily_platform_metric::Column::MetricDate)
            .order_by_asc(daily_platform_metric::Column::Dimension)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Account-level rows of every integration the client owns, whatever the
    /// integration's current status.
    pub async fn account_rows_for_client(
        &self,
        client_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<daily_platform_metric::Model>> {
        let rows = DailyPlatformMetric::find()
            .join(
                JoinType::InnerJoin,
                daily_platform_metric::Relation::Integration.def(),
            )
            .filter(integration::Column::ClientId.eq(client_id))
            .filter(daily_platform_metric::Column::Dimension.eq(ACCOUNT_DIMENSION))
            .filter(daily_platform_metric::Column::MetricDate.between(from, to))
            .order_by_asc(daily_platform_metric::Column::MetricDate)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}

/// Upserts one fetched series for an integration. Returns the rows written.
pub async fn upsert_series<C: ConnectionTrait>(
    conn: &C,
    integration_id: Uuid,
    platform: &str,
    records: &[DailyMetric],
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let now = sea_orm::prelude::DateTimeWithTimeZone::from(now);
    let mut written = 0;

    for record in records {
        let row = daily_platform_metric::ActiveModel {
            id: Set(Uuid::new_v4()),
            integration_id: Set(integration_id),
            platform: Set(platform.to_string()),
            metric_date: Set(record.date),
            dimension: Set(record.dimension.clone()),
            impressions: Set(record.impressions),
            clicks: Set(record.clicks),
            spend: Set(record.spend),
            conversions: Set(record.conversions),
            conversion_value: Set(record.conversion_value),
            reach: Set(record.reach),
            sessions: Set(record.sessions),
            users: Set(record.users),
            new_users: Set(record.new_users),
            page_views: Set(record.page_views),
            raw: Set(record.raw.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        DailyPlatformMetric::insert(row)
            .on_conflict(
                OnConflict::columns([
                    daily_platform_metric::Column::IntegrationId,
                    daily_platform_metric::Column::MetricDate,
                    daily_platform_metric::Column::Dimension,
                ])
                .update_columns([
                    daily_platform_metric::Column::Platform,
                    daily_platform_metric::Column::Impressions,
                    daily_platform_metric::Column::Clicks,
                    daily_platform_metric::Column::Spend,
                    daily_platform_metric::Column::Conversions,
                    daily_platform_metric::Column::ConversionValue,
                    daily_platform_metric::Column::Reach,
                    daily_platform_metric::Column::Sessions,
                    daily_platform_metric::Column::Users,
                    daily_platform_metric::Column::NewUsers,
                    daily_platform_metric::Column::PageViews,
                    daily_platform_metric::Column::Raw,
                    daily_platform_metric::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        written += 1;
    }

    Ok(written)
}
