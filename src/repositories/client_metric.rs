//! Client-facing metric repository
//!
//! [`ClientMetricRepository::find_by_key`] is the read contract for report
//! generation. Writes are upserts keyed on `(client_id, period_type, period_start)`.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::client_metric::{self, Entity as ClientMetric, PeriodType};

/// Whether an upsert created the row or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
pub struct ClientMetricRepository {
    db: Arc<DatabaseConnection>,
}

impl ClientMetricRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_key(
        &self,
        client_id: Uuid,
        period_type: PeriodType,
        period_start: NaiveDate,
    ) -> Result<Option<client_metric::Model>> {
        let row = ClientMetric::find()
            .filter(client_metric::Column::ClientId.eq(client_id))
            .filter(client_metric::Column::PeriodType.eq(period_type.as_str()))
            .filter(client_metric::Column::PeriodStart.eq(period_start))
            .one(&*self.db)
            .await?;
        Ok(row)
    }

    /// Every client's row for one bucket.
    pub async fn list_for_period(
        &self,
        period_type: PeriodType,
        period_start: NaiveDate,
    ) -> Result<Vec<client_metric::Model>> {
        let rows = ClientMetric::find()
            .filter(client_metric::Column::PeriodType.eq(period_type.as_str()))
            .filter(client_metric::Column::PeriodStart.eq(period_start))
            .order_by_asc(client_metric::Column::ClientId)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Writes `row`, replacing any existing row for the same key.
    ///
    /// The prior-row probe and the write are not atomic; two concurrent first
    /// writes for one key both report `Inserted`.
    pub async fn upsert(&self, row: client_metric::Model) -> Result<UpsertKind> {
        let period_type: PeriodType = row
            .period_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let kind = match self
            .find_by_key(row.client_id, period_type, row.period_start)
            .await?
        {
            Some(_) => UpsertKind::Updated,
            None => UpsertKind::Inserted,
        };

        let now = sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now());
        let active = client_metric::ActiveModel {
            id: Set(row.id),
            client_id: Set(row.client_id),
            period_type: Set(row.period_type),
            period_start: Set(row.period_start),
            period_end: Set(row.period_end),
            impressions: Set(row.impressions),
            clicks: Set(row.clicks),
            spend: Set(row.spend),
            conversions: Set(row.conversions),
            conversion_value: Set(row.conversion_value),
            sessions: Set(row.sessions),
            users: Set(row.users),
            page_views: Set(row.page_views),
            ctr: Set(row.ctr),
            cpc: Set(row.cpc),
            cpa: Set(row.cpa),
            conversion_rate: Set(row.conversion_rate),
            roas: Set(row.roas),
            source_record_count: Set(row.source_record_count),
            platforms: Set(row.platforms),
            created_at: Set(now),
            updated_at: Set(now),
        };

        ClientMetric::insert(active)
            .on_conflict(
                OnConflict::columns([
                    client_metric::Column::ClientId,
                    client_metric::Column::PeriodType,
                    client_metric::Column::PeriodStart,
                ])
                .update_columns([
                    client_metric::Column::PeriodEnd,
                    client_metric::Column::Impressions,
                    client_metric::Column::Clicks,
                    client_metric::Column::Spend,
                    client_metric::Column::Conversions,
                    client_metric::Column::ConversionValue,
                    client_metric::Column::Sessions,
                    client_metric::Column::Users,
                    client_metric::Column::PageViews,
                    client_metric::Column::Ctr,
                    client_metric::Column::Cpc,
                    client_metric::Column::Cpa,
                    client_metric::Column::ConversionRate,
                    client_metric::Column::Roas,
                    client_metric::Column::SourceRecordCount,
                    client_metric::Column::Platforms,
                    client_metric::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Ok(kind)
    }
}
