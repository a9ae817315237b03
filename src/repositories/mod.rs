//! # Repository Layer
//!
//! SeaORM access for clients, integrations, daily rows, client-facing metrics
//! and sync logs. Writes the sync engine performs inside its transaction are
//! exposed as functions generic over [`sea_orm::ConnectionTrait`].

pub mod client;
pub mod client_metric;
pub mod daily_metric;
pub mod integration;
pub mod sync_log;

pub use client::ClientRepository;
pub use client_metric::{ClientMetricRepository, UpsertKind};
pub use daily_metric::DailyMetricRepository;
pub use integration::{IntegrationRepository, NewIntegration};
pub use sync_log::{NewSyncLog, SyncLogRepository};

use sea_orm::DbErr;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::error::is_foreign_key_violation;

/// Store-layer failure with the cases callers act on split out.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("client {0} does not exist")]
    ClientNotFound(Uuid),
    #[error("integration {0} no longer exists")]
    IntegrationGone(Uuid),
    #[error("invalid integration bundle: {0}")]
    InvalidBundle(String),
    #[error("credential sealing failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

impl StoreError {
    /// Turns a foreign-key violation on an integration-owned row into
    /// [`StoreError::IntegrationGone`].
    pub fn for_integration_write(err: DbErr, integration_id: Uuid) -> Self {
        if is_foreign_key_violation(&err) {
            StoreError::IntegrationGone(integration_id)
        } else {
            StoreError::Db(err)
        }
    }
}
