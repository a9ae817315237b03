//! Sync Engine
//!
//! Fetches daily series from platform adapters and persists them as upserts.
//!
//! A run either writes the whole fetched range, the integration update and a
//! success log entry in one transaction, or writes nothing but the failure
//! bookkeeping. Batch runs isolate every integration: one failing, hanging or
//! panicking item never stops the others.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::crypto::CryptoKey;
use crate::error::is_foreign_key_violation;
use crate::models::integration::{self, IntegrationStatus};
use crate::platforms::{
    FetchError, FetchErrorKind, FetchRequest, PlatformAdapter, PlatformConfig,
    PlatformCredentials, Registry, RegistryError, validate_series,
};
use crate::repositories::{
    IntegrationRepository, NewSyncLog, StoreError, daily_metric, integration as integration_store,
    sync_log,
};
use crate::telemetry::{SYNC_DURATION_SECONDS, SYNC_RECORDS_TOTAL, SYNC_RUNS_TOTAL};

/// Why a sync attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    RateLimited,
    AuthExpired,
    InvalidConfig,
    Transient,
    /// Stored platform identifier has no adapter
    UnknownPlatform,
    /// Requested window is empty or inverted
    InvalidRange,
    /// Write to the store failed
    Store,
    /// Integration was deleted while the run was in flight
    IntegrationGone,
    /// Batch budget elapsed or the trigger was cancelled first
    Cancelled,
    /// The sync task ended without producing a result
    Internal,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::RateLimited => "rate_limited",
            SyncErrorKind::AuthExpired => "auth_expired",
            SyncErrorKind::InvalidConfig => "invalid_config",
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::UnknownPlatform => "unknown_platform",
            SyncErrorKind::InvalidRange => "invalid_range",
            SyncErrorKind::Store => "store",
            SyncErrorKind::IntegrationGone => "integration_gone",
            SyncErrorKind::Cancelled => "cancelled",
            SyncErrorKind::Internal => "internal",
        }
    }

    /// Retryable failures are left to the next scheduled cycle and only
    /// demote the integration once the failure threshold is reached.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncErrorKind::RateLimited | SyncErrorKind::Transient)
    }

    /// Kinds that count against the integration's health.
    fn affects_status(&self) -> bool {
        matches!(
            self,
            SyncErrorKind::RateLimited
                | SyncErrorKind::AuthExpired
                | SyncErrorKind::InvalidConfig
                | SyncErrorKind::Transient
                | SyncErrorKind::UnknownPlatform
        )
    }
}

impl From<&FetchErrorKind> for SyncErrorKind {
    fn from(kind: &FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::RateLimited { .. } => SyncErrorKind::RateLimited,
            FetchErrorKind::AuthExpired => SyncErrorKind::AuthExpired,
            FetchErrorKind::InvalidConfig => SyncErrorKind::InvalidConfig,
            FetchErrorKind::Transient => SyncErrorKind::Transient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncFailure {
    pub kind: SyncErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl SyncFailure {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl From<FetchError> for SyncFailure {
    fn from(err: FetchError) -> Self {
        let retry_after_secs = match err.kind {
            FetchErrorKind::RateLimited { retry_after_secs } => retry_after_secs,
            _ => None,
        };
        Self {
            kind: SyncErrorKind::from(&err.kind),
            message: err.message,
            retry_after_secs,
        }
    }
}

impl From<StoreError> for SyncFailure {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::IntegrationGone(_) => SyncErrorKind::IntegrationGone,
            _ => SyncErrorKind::Store,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result of syncing one integration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncOutcome {
    pub integration_id: Uuid,
    pub platform: String,
    pub success: bool,
    /// Daily rows written
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
    /// Integration status after the run; absent when the run left it untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_after: Option<IntegrationStatus>,
}

impl SyncOutcome {
    fn failed(integration_id: Uuid, platform: &str, failure: SyncFailure) -> Self {
        Self {
            integration_id,
            platform: platform.to_string(),
            success: false,
            record_count: 0,
            error: Some(failure),
            status_after: None,
        }
    }
}

/// Result of a batch run over all active integrations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncAllReport {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<SyncOutcome>,
    /// Set when the batch could not start, e.g. listing integrations failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncAllReport {
    fn from_results(date_from: NaiveDate, date_to: NaiveDate, results: Vec<SyncOutcome>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            date_from,
            date_to,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
            error: None,
        }
    }
}

/// Result of a credential check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionCheck {
    pub integration_id: Uuid,
    pub verified: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
}

/// Status an integration moves to after a failed fetch.
///
/// Auth and configuration failures demote at once. Retryable failures keep
/// the current status until `consecutive_failures` reaches `threshold`.
pub fn status_after_failure(
    kind: SyncErrorKind,
    current: Option<IntegrationStatus>,
    consecutive_failures: i32,
    threshold: u32,
) -> IntegrationStatus {
    if !kind.is_retryable() {
        return IntegrationStatus::Error;
    }
    let reached = i64::from(consecutive_failures) >= i64::from(threshold);
    match current {
        Some(status) if !reached => status,
        _ => IntegrationStatus::Error,
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<DatabaseConnection>,
    registry: Arc<Registry>,
    integrations: IntegrationRepository,
    config: SyncConfig,
}

impl SyncEngine {
    /// Creates an engine over the shared pool and adapter registry.
    ///
    /// # Arguments
    ///
    /// * `db` - Connection pool shared with the API and scheduler
    /// * `registry` - Adapters keyed by platform
    /// * `crypto_key` - Key sealing stored credentials
    /// * `config` - Failure threshold, concurrency and time budgets
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use anyhow::Context;
    /// use portal_sync::{
    ///     config::ConfigLoader, crypto::CryptoKey, db::init_pool, platforms::Registry,
    ///     sync_engine::SyncEngine,
    /// };
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = ConfigLoader::new().load()?;
    ///     let db = Arc::new(init_pool(&config).await?);
    ///     let registry = Registry::from_settings(&config.platforms, config.sync.fetch_timeout())?;
    ///     let key = CryptoKey::new(config.crypto_key.clone().context("crypto key")?)?;
    ///     let engine = SyncEngine::new(db, Arc::new(registry), key, config.sync.clone());
    ///     assert_eq!(engine.config().failure_threshold, config.sync.failure_threshold);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<Registry>,
        crypto_key: CryptoKey,
        config: SyncConfig,
    ) -> Self {
        let integrations = IntegrationRepository::new(db.clone(), crypto_key);
        Self {
            db,
            registry,
            integrations,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Syncs one integration for `[date_from, date_to]`.
    ///
    /// Fetched rows, refreshed credentials, the status change and the success
    /// log entry are committed together. On failure previously stored days are
    /// left untouched and a failing log entry is appended.
    ///
    /// # Arguments
    ///
    /// * `integration` - Stored integration to sync
    /// * `date_from` - First day of the window, inclusive
    /// * `date_to` - Last day of the window, inclusive
    ///
    /// # Returns
    ///
    /// Never fails. The returned `SyncOutcome` carries the record count on
    /// success or the typed failure otherwise, so batch callers can move on.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use portal_sync::{models::integration, sync_engine::SyncEngine};
    /// # async fn run(engine: &SyncEngine, integration: &integration::Model) {
    /// use chrono::NaiveDate;
    ///
    /// let from = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
    /// let to = NaiveDate::from_ymd_opt(2024, 5, 12).unwrap();
    /// let outcome = engine.sync_integration(integration, from, to).await;
    /// if let Some(failure) = &outcome.error {
    ///     eprintln!("sync failed: {}", failure.message);
    /// }
    /// # }
    /// ```
    #[instrument(skip(self, integration), fields(integration_id = %integration.id, platform = %integration.platform))]
    pub async fn sync_integration(
        &self,
        integration: &integration::Model,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> SyncOutcome {
        let started = Instant::now();

        // Inverted ranges are logged as failed attempts without fetching.
        let result = if date_from > date_to {
            Err(SyncFailure::new(
                SyncErrorKind::InvalidRange,
                format!("date_from {date_from} is after date_to {date_to}"),
            ))
        } else {
            self.run(integration, date_from, date_to, started).await
        };

        let outcome = match result {
            Ok(record_count) => {
                info!(record_count, "integration synced");
                SyncOutcome {
                    integration_id: integration.id,
                    platform: integration.platform.clone(),
                    success: true,
                    record_count,
                    error: None,
                    status_after: Some(IntegrationStatus::Active),
                }
            }
            Err(failure) => {
                warn!(kind = failure.kind.as_str(), error = %failure.message, "integration sync failed");
                self.record_failure(integration, date_from, date_to, failure, started.elapsed())
                    .await
            }
        };

        let outcome_label = match &outcome.error {
            None => "success",
            Some(failure) => failure.kind.as_str(),
        };
        counter!(SYNC_RUNS_TOTAL, "platform" => integration.platform.clone(), "outcome" => outcome_label)
            .increment(1);
        counter!(SYNC_RECORDS_TOTAL, "platform" => integration.platform.clone())
            .increment(outcome.record_count);
        histogram!(SYNC_DURATION_SECONDS, "platform" => integration.platform.clone())
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn run(
        &self,
        integration: &integration::Model,
        date_from: NaiveDate,
        date_to: NaiveDate,
        started: Instant,
    ) -> Result<u64, SyncFailure> {
        let (adapter, credentials, config) = self.prepare(integration)?;

        let request = FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from,
            date_to,
        };
        let fetched = tokio::time::timeout(
            self.config.fetch_timeout(),
            adapter.fetch_daily_metrics(request),
        )
        .await
        .map_err(|_| {
            SyncFailure::new(
                SyncErrorKind::Transient,
                format!(
                    "fetch timed out after {}s",
                    self.config.fetch_timeout().as_secs()
                ),
            )
        })??;

        validate_series(&fetched.records, date_from, date_to)?;
        debug!(rows = fetched.records.len(), "fetched series validated");

        let sealed = match &fetched.refreshed_credentials {
            Some(refreshed) => Some(
                self.integrations
                    .seal_credentials(integration, refreshed)
                    .map_err(StoreError::from)?,
            ),
            None => None,
        };

        let txn = self.db.begin().await.map_err(StoreError::from)?;
        let written = async {
            let written = daily_metric::upsert_series(
                &txn,
                integration.id,
                &integration.platform,
                &fetched.records,
                Utc::now(),
            )
            .await
            .map_err(|e| StoreError::for_integration_write(e, integration.id))?;

            let touched =
                integration_store::record_sync_success(&txn, integration.id, Utc::now(), sealed)
                    .await?;
            if touched == 0 {
                return Err(StoreError::IntegrationGone(integration.id));
            }

            sync_log::append(
                &txn,
                NewSyncLog {
                    integration_id: integration.id,
                    date_from,
                    date_to,
                    record_count: i32::try_from(written).unwrap_or(i32::MAX),
                    success: true,
                    error_kind: None,
                    error_message: None,
                    duration_ms: duration_ms(started.elapsed()),
                },
                Utc::now(),
            )
            .await
            .map_err(|e| StoreError::for_integration_write(e, integration.id))?;

            Ok::<u64, StoreError>(written)
        }
        .await;

        match written {
            Ok(written) => {
                txn.commit().await.map_err(StoreError::from)?;
                Ok(written)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed sync write failed");
                }
                Err(err.into())
            }
        }
    }

    /// Resolves adapter, credentials and config, checking they fit together.
    fn prepare(
        &self,
        integration: &integration::Model,
    ) -> Result<(Arc<dyn PlatformAdapter>, PlatformCredentials, PlatformConfig), SyncFailure> {
        let (platform, adapter) =
            self.registry
                .resolve(&integration.platform)
                .map_err(|err| match err {
                    RegistryError::UnknownPlatform(_) => {
                        SyncFailure::new(SyncErrorKind::UnknownPlatform, err.to_string())
                    }
                    other => SyncFailure::new(SyncErrorKind::InvalidConfig, other.to_string()),
                })?;

        let credentials = self.integrations.open_credentials(integration).map_err(|err| {
            SyncFailure::new(
                SyncErrorKind::InvalidConfig,
                format!("stored credentials could not be opened: {err}"),
            )
        })?;
        if !credentials.supports(platform) {
            return Err(SyncFailure::new(
                SyncErrorKind::InvalidConfig,
                format!("{} credentials cannot be used for {platform}", credentials.kind()),
            ));
        }

        let config = PlatformConfig::from_json(&integration.config)?;
        if !config.supports(platform) {
            return Err(SyncFailure::new(
                SyncErrorKind::InvalidConfig,
                format!("integration config does not match platform {platform}"),
            ));
        }

        Ok((adapter, credentials, config))
    }

    /// Applies the failure policy and appends the failure log entry.
    async fn record_failure(
        &self,
        integration: &integration::Model,
        date_from: NaiveDate,
        date_to: NaiveDate,
        failure: SyncFailure,
        elapsed: Duration,
    ) -> SyncOutcome {
        let now = Utc::now();
        let mut outcome = SyncOutcome::failed(integration.id, &integration.platform, failure.clone());

        if failure.kind.affects_status() {
            // Re-read so concurrent runs count every failure.
            match self.integrations.find_by_id(integration.id).await {
                Ok(Some(current)) => {
                    let failures = current.consecutive_failures.saturating_add(1);
                    let status = status_after_failure(
                        failure.kind,
                        current.status(),
                        failures,
                        self.config.failure_threshold,
                    );
                    match integration_store::record_sync_failure(
                        &*self.db,
                        integration.id,
                        status,
                        failures,
                        &failure.message,
                        now,
                    )
                    .await
                    {
                        Ok(touched) if touched > 0 => outcome.status_after = Some(status),
                        Ok(_) => debug!("integration deleted before failure could be recorded"),
                        Err(err) => warn!(error = %err, "failed to record integration failure"),
                    }
                }
                Ok(None) => debug!("integration deleted before failure could be recorded"),
                Err(err) => warn!(error = %err, "failed to reload integration"),
            }
        }

        let entry = NewSyncLog {
            integration_id: integration.id,
            date_from,
            date_to,
            record_count: 0,
            success: false,
            error_kind: Some(failure.kind.as_str().to_string()),
            error_message: Some(failure.message.clone()),
            duration_ms: duration_ms(elapsed),
        };
        if let Err(err) = sync_log::append(&*self.db, entry, now).await {
            if is_foreign_key_violation(&err) {
                debug!("integration deleted; failure log entry dropped");
            } else {
                warn!(error = %err, "failed to append failure log entry");
            }
        }

        outcome
    }

    /// Syncs every active integration within the configured batch budget.
    ///
    /// Integrations run concurrently up to the configured limit. One
    /// integration failing never stops the others.
    ///
    /// # Returns
    ///
    /// A `SyncAllReport` with one `SyncOutcome` per active integration and the
    /// succeeded and failed totals. `error` is set only when the batch could
    /// not start.
    pub async fn sync_all_active(&self, date_from: NaiveDate, date_to: NaiveDate) -> SyncAllReport {
        self.sync_all_active_with(
            date_from,
            date_to,
            self.config.batch_budget(),
            CancellationToken::new(),
        )
        .await
    }

    /// Batch sync bounded by `budget` and `cancel`.
    ///
    /// Integrations still running when either fires are aborted and reported
    /// as `cancelled`; their stored rows are left as they were.
    #[instrument(skip(self, cancel), fields(from = %date_from, to = %date_to))]
    pub async fn sync_all_active_with(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        budget: Duration,
        cancel: CancellationToken,
    ) -> SyncAllReport {
        let started = Instant::now();
        let integrations = match self.integrations.list_active().await {
            Ok(list) => list,
            Err(err) => {
                error!(error = %err, "failed to list active integrations");
                let mut report = SyncAllReport::from_results(date_from, date_to, Vec::new());
                report.error = Some(format!("failed to list active integrations: {err}"));
                return report;
            }
        };

        let order: HashMap<Uuid, usize> = integrations
            .iter()
            .enumerate()
            .map(|(idx, i)| (i.id, idx))
            .collect();
        let mut pending: HashMap<Uuid, String> = integrations
            .iter()
            .map(|i| (i.id, i.platform.clone()))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for integration in integrations {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                engine.sync_integration(&integration, date_from, date_to).await
            });
        }

        let deadline = tokio::time::Instant::now() + budget;
        let mut results = Vec::with_capacity(pending.len());
        let mut interrupted = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = Some("sync batch cancelled");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    interrupted = Some("sync batch budget exhausted");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => {
                        pending.remove(&outcome.integration_id);
                        results.push(outcome);
                    }
                    Some(Err(err)) => error!(error = %err, "sync task failed"),
                }
            }
        }

        if let Some(reason) = interrupted {
            warn!(unfinished = pending.len(), reason, "aborting unfinished syncs");
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if let Ok(outcome) = joined {
                    pending.remove(&outcome.integration_id);
                    results.push(outcome);
                }
            }
        }

        let leftover_kind = if interrupted.is_some() {
            SyncErrorKind::Cancelled
        } else {
            SyncErrorKind::Internal
        };
        for (integration_id, platform) in pending {
            let message = interrupted.unwrap_or("sync task ended without a result");
            results.push(SyncOutcome::failed(
                integration_id,
                &platform,
                SyncFailure::new(leftover_kind, message),
            ));
        }
        results.sort_by_key(|r| order.get(&r.integration_id).copied().unwrap_or(usize::MAX));

        let report = SyncAllReport::from_results(date_from, date_to, results);
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = duration_ms(started.elapsed()),
            "sync batch finished"
        );
        report
    }

    /// Syncs one integration by id. `None` when it does not exist.
    pub async fn sync_by_id(
        &self,
        integration_id: Uuid,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> anyhow::Result<Option<SyncOutcome>> {
        let Some(integration) = self.integrations.find_by_id(integration_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.sync_integration(&integration, date_from, date_to).await))
    }

    /// Verifies stored credentials. A verified `inactive` or `error`
    /// integration becomes `active`; a rejected one keeps its status and gets
    /// `last_error` set. `None` when the integration does not exist.
    #[instrument(skip(self))]
    pub async fn test_integration(&self, integration_id: Uuid) -> anyhow::Result<Option<ConnectionCheck>> {
        let Some(integration) = self.integrations.find_by_id(integration_id).await? else {
            return Ok(None);
        };

        let checked = match self.prepare(&integration) {
            Ok((adapter, credentials, _)) => tokio::time::timeout(
                self.config.fetch_timeout(),
                adapter.test_connection(&credentials),
            )
            .await
            .unwrap_or_else(|_| Err(FetchError::transient("connection test timed out")))
            .map_err(SyncFailure::from),
            Err(failure) => Err(failure),
        };

        let (verified, error) = match checked {
            Ok(true) => (true, None),
            Ok(false) => (
                false,
                Some(SyncFailure::new(
                    SyncErrorKind::AuthExpired,
                    "platform rejected the stored credentials",
                )),
            ),
            Err(failure) => (false, Some(failure)),
        };

        let status = if verified {
            self.integrations
                .set_status(integration_id, IntegrationStatus::Active, None)
                .await?;
            IntegrationStatus::Active.as_str().to_string()
        } else {
            if let Some(failure) = &error {
                self.integrations
                    .set_last_error(integration_id, &failure.message)
                    .await?;
            }
            integration.status.clone()
        };
        info!(verified, status = %status, "connection test finished");

        Ok(Some(ConnectionCheck {
            integration_id,
            verified,
            status,
            error,
        }))
    }
}

fn duration_ms(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
