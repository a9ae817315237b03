//! Sync log repository. Entries are append-only.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_log::{self, Entity as SyncLog};

#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub integration_id: Uuid,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub record_count: i32,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Most recent entries first.
    pub async fn list_for_integration(
        &self,
        integration_id: Uuid,
        limit: u64,
    ) -> Result<Vec<sync_log::Model>> {
        let rows = SyncLog::find()
            .filter(sync_log::Column::IntegrationId.eq(integration_id))
            .order_by_desc(sync_log::Column::CreatedAt)
            .order_by_desc(sync_log::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}

pub async fn append<C: ConnectionTrait>(
    conn: &C,
    entry: NewSyncLog,
    now: DateTime<Utc>,
) -> Result<sync_log::Model, DbErr> {
    sync_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        integration_id: Set(entry.integration_id),
        date_from: Set(entry.date_from),
        date_to: Set(entry.date_to),
        record_count: Set(entry.record_count),
        success: Set(entry.success),
        error_kind: Set(entry.error_kind),
        error_message: Set(entry.error_message),
        duration_ms: Set(entry.duration_ms),
        created_at: Set(now.into()),
    }
    .insert(conn)
    .await
}
