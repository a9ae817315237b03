//! Shared fixtures for the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, seeded
//! clients and integrations, and a scriptable platform adapter.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use migration::{Migrator, MigratorTrait};
use portal_sync::config::{AppConfig, SyncConfig};
use portal_sync::crypto::CryptoKey;
use portal_sync::models::integration::{self, IntegrationStatus};
use portal_sync::platforms::{
    DailyMetric, FetchError, FetchOutcome, FetchRequest, MetaAdsConfig, MetaCredentials,
    Platform, PlatformAdapter, PlatformConfig, PlatformCredentials,
};
use portal_sync::repositories::{ClientRepository, IntegrationRepository, NewIntegration};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "operator-token";

/// In-memory SQLite with every migration applied.
///
/// A single pooled connection keeps every query on the same in-memory
/// database. Foreign keys stay enforced so delete races behave as on Postgres.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;
    Migrator::up(&db, None).await?;

    Ok(Arc::new(db))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("valid test key")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(test_crypto_key().as_bytes().to_vec()),
        ..AppConfig::default()
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        concurrency: 2,
        fetch_timeout_seconds: 5,
        batch_budget_seconds: 30,
        failure_threshold: 3,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub async fn create_client(db: &Arc<DatabaseConnection>, name: &str) -> Result<Uuid> {
    Ok(ClientRepository::new(db.clone()).create(name).await?.id)
}

pub fn meta_bundle(account: &str) -> (PlatformCredentials, PlatformConfig) {
    (
        PlatformCredentials::Meta(MetaCredentials {
            access_token: format!("token-{account}"),
            expires_at: None,
        }),
        PlatformConfig::MetaAds(MetaAdsConfig {
            ad_account_id: account.to_string(),
            conversion_action_types: Vec::new(),
        }),
    )
}

/// Creates a Meta Ads integration for `client_id` and marks it `active`.
pub async fn seed_active_integration(
    db: &Arc<DatabaseConnection>,
    client_id: Uuid,
    account: &str,
) -> Result<integration::Model> {
    let repo = IntegrationRepository::new(db.clone(), test_crypto_key());
    let (credentials, config) = meta_bundle(account);
    let created = repo
        .create(NewIntegration {
            client_id,
            platform: Platform::MetaAds,
            display_name: format!("Meta {account}"),
            credentials,
            config,
            created_by: None,
        })
        .await?;
    repo.set_status(created.id, IntegrationStatus::Active, None)
        .await?;
    repo.find_by_id(created.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("seeded integration vanished"))
}

pub async fn reload(db: &Arc<DatabaseConnection>, id: Uuid) -> integration::Model {
    IntegrationRepository::new(db.clone(), test_crypto_key())
        .find_by_id(id)
        .await
        .expect("query integration")
        .expect("integration exists")
}

/// Figures reported for every day of a fetch.
#[derive(Debug, Clone, Copy)]
pub struct DailyFigures {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
}

impl Default for DailyFigures {
    fn default() -> Self {
        Self {
            impressions: 1000,
            clicks: 80,
            spend: 40.0,
            conversions: 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Daily(DailyFigures),
    Fail(FetchError),
    Hang,
    Panic,
}

/// Adapter whose responses are scripted per account id.
///
/// Accounts without a script get [`Behavior::Daily`] with default figures.
pub struct FakeAdapter {
    scripts: Mutex<Vec<(String, Behavior)>>,
    refreshed: Mutex<Option<PlatformCredentials>>,
    calls: AtomicUsize,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            refreshed: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, account: &str, behavior: Behavior) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.retain(|(a, _)| a != account);
        scripts.push((account.to_string(), behavior));
    }

    /// Credentials handed back as refreshed on every successful fetch.
    pub fn refresh_with(&self, credentials: PlatformCredentials) {
        *self.refreshed.lock().unwrap() = Some(credentials);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, config: &PlatformConfig) -> Behavior {
        let account = match config {
            PlatformConfig::MetaAds(c) => c.ad_account_id.as_str(),
            _ => "",
        };
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(a, _)| a == account)
            .map(|(_, b)| b.clone())
            .unwrap_or(Behavior::Daily(DailyFigures::default()))
    }
}

pub fn daily_series(from: NaiveDate, to: NaiveDate, figures: DailyFigures) -> Vec<DailyMetric> {
    let mut records = Vec::new();
    let mut day = from;
    while day <= to {
        let mut record = DailyMetric::account(day);
        record.impressions = Some(figures.impressions);
        record.clicks = Some(figures.clicks);
        record.spend = Some(figures.spend);
        record.conversions = Some(figures.conversions);
        records.push(record);
        day = day + Days::new(1);
    }
    records
}

#[async_trait]
impl PlatformAdapter for FakeAdapter {
    async fn test_connection(&self, _credentials: &PlatformCredentials) -> Result<bool, FetchError> {
        Ok(true)
    }

    async fn fetch_daily_metrics(
        &self,
        request: FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior_for(request.config) {
            Behavior::Daily(figures) => Ok(FetchOutcome {
                records: daily_series(request.date_from, request.date_to, figures),
                refreshed_credentials: self.refreshed.lock().unwrap().clone(),
            }),
            Behavior::Fail(err) => Err(err),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
            Behavior::Panic => panic!("adapter blew up"),
        }
    }
}
