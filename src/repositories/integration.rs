//! Integration repository
//!
//! Owns sealing of credential bundles and the two-step delete. Status updates
//! made by the sync engine go through the free functions at the bottom so they
//! can join the engine's transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::StoreError;
use crate::crypto::{self, CryptoError, CryptoKey};
use crate::error::is_foreign_key_violation;
use crate::models::integration::{self, Entity as Integration, IntegrationStatus, credentials_aad};
use crate::models::{DailyPlatformMetric, SyncLog, daily_platform_metric, sync_log};
use crate::platforms::{Platform, PlatformConfig, PlatformCredentials};

/// Input for [`IntegrationRepository::create`].
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub client_id: Uuid,
    pub platform: Platform,
    pub display_name: String,
    pub credentials: PlatformCredentials,
    pub config: PlatformConfig,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl IntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Creates an `inactive` integration with sealed credentials.
    pub async fn create(&self, new: NewIntegration) -> Result<integration::Model, StoreError> {
        if !new.credentials.supports(new.platform) {
            return Err(StoreError::InvalidBundle(format!(
                "{} credentials cannot be used for {}",
                new.credentials.kind(),
                new.platform
            )));
        }
        if !new.config.supports(new.platform) {
            return Err(StoreError::InvalidBundle(format!(
                "config does not match platform {}",
                new.platform
            )));
        }
        let config = serde_json::to_value(&new.config)
            .map_err(|e| StoreError::InvalidBundle(e.to_string()))?;

        let id = Uuid::new_v4();
        let aad = credentials_aad(new.client_id, new.platform.as_str(), id);
        let sealed = crypto::seal_credentials(&self.crypto_key, &aad, &new.credentials)?;
        let now = Utc::now();

        let model = integration::ActiveModel {
            id: Set(id),
            client_id: Set(new.client_id),
            platform: Set(new.platform.as_str().to_string()),
            display_name: Set(new.display_name),
            credentials_ciphertext: Set(sealed),
            config: Set(config),
            status: Set(IntegrationStatus::Inactive.as_str().to_string()),
            consecutive_failures: Set(0),
            last_error: Set(None),
            last_sync_at: Set(None),
            created_by: Set(new.created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match model.insert(&*self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_foreign_key_violation(&err) => Err(StoreError::ClientNotFound(new.client_id)),
            Err(err) => Err(StoreError::Db(err)),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<integration::Model>> {
        Ok(Integration::find_by_id(id).one(&*self.db).await?)
    }

    /// Integrations eligible for the scheduled sync, oldest first.
    pub async fn list_active(&self) -> Result<Vec<integration::Model>> {
        let rows = Integration::find()
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .order_by_asc(integration::Column::CreatedAt)
            .order_by_asc(integration::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    pub fn open_credentials(
        &self,
        integration: &integration::Model,
    ) -> Result<PlatformCredentials, CryptoError> {
        crypto::open_credentials(
            &self.crypto_key,
            &integration.credentials_aad(),
            &integration.credentials_ciphertext,
        )
    }

    pub fn seal_credentials(
        &self,
        integration: &integration::Model,
        credentials: &PlatformCredentials,
    ) -> Result<Vec<u8>, CryptoError> {
        crypto::seal_credentials(&self.crypto_key, &integration.credentials_aad(), credentials)
    }

    /// Sets status and `last_error` outside a sync run (connection tests).
    pub async fn set_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let mut update = Integration::update_many()
            .col_expr(integration::Column::Status, Expr::value(status.as_str()))
            .col_expr(
                integration::Column::LastError,
                Expr::value(last_error.map(str::to_string)),
            )
            .col_expr(
                integration::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            );
        if status == IntegrationStatus::Active {
            update = update.col_expr(integration::Column::ConsecutiveFailures, Expr::value(0));
        }
        let result = update
            .filter(integration::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Records a failed connection check without touching status or the
    /// failure counter.
    pub async fn set_last_error(&self, id: Uuid, last_error: &str) -> Result<bool> {
        let result = Integration::update_many()
            .col_expr(
                integration::Column::LastError,
                Expr::value(Some(last_error.to_string())),
            )
            .col_expr(
                integration::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(integration::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Deletes daily rows and sync logs, then the integration, in one transaction.
    ///
    /// Returns `false` when the integration did not exist.
    pub async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let txn = self.db.begin().await?;

        let metrics = DailyPlatformMetric::delete_many()
            .filter(daily_platform_metric::Column::IntegrationId.eq(id))
            .exec(&txn)
            .await?;
        let logs = SyncLog::delete_many()
            .filter(sync_log::Column::IntegrationId.eq(id))
            .exec(&txn)
            .await?;
        let deleted = Integration::delete_by_id(id).exec(&txn).await?;

        if deleted.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }
        txn.commit().await?;

        info!(
            integration_id = %id,
            daily_rows = metrics.rows_affected,
            sync_logs = logs.rows_affected,
            "deleted integration"
        );
        Ok(true)
    }
}

/// Marks a successful sync: `active`, counter reset, `last_sync_at` stamped,
/// `last_error` cleared, and re-sealed credentials stored when given.
///
/// Returns the number of rows touched; zero means the integration is gone.
pub async fn record_sync_success<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    now: DateTime<Utc>,
    sealed_credentials: Option<Vec<u8>>,
) -> Result<u64, DbErr> {
    let now = sea_orm::prelude::DateTimeWithTimeZone::from(now);
    let mut update = Integration::update_many()
        .col_expr(
            integration::Column::Status,
            Expr::value(IntegrationStatus::Active.as_str()),
        )
        .col_expr(integration::Column::ConsecutiveFailures, Expr::value(0))
        .col_expr(integration::Column::LastError, Expr::value(Option::<String>::None))
        .col_expr(integration::Column::LastSyncAt, Expr::value(now))
        .col_expr(integration::Column::UpdatedAt, Expr::value(now));
    if let Some(sealed) = sealed_credentials {
        update = update.col_expr(integration::Column::CredentialsCiphertext, Expr::value(sealed));
    }
    let result = update
        .filter(integration::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Records a failed sync with the status decided by the engine's policy.
pub async fn record_sync_failure<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    status: IntegrationStatus,
    consecutive_failures: i32,
    last_error: &str,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = Integration::update_many()
        .col_expr(integration::Column::Status, Expr::value(status.as_str()))
        .col_expr(
            integration::Column::ConsecutiveFailures,
            Expr::value(consecutive_failures),
        )
        .col_expr(
            integration::Column::LastError,
            Expr::value(Some(last_error.to_string())),
        )
        .col_expr(
            integration::Column::UpdatedAt,
            Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(now)),
        )
        .filter(integration::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
