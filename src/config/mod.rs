//! Configuration loading for the portal sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PORTAL_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PORTAL_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `PORTAL_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// Offset of the agency's reporting timezone from UTC, in minutes.
    #[serde(default = "default_reporting_utc_offset_minutes")]
    pub reporting_utc_offset_minutes: i32,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub platforms: PlatformSettings,
}

/// Sync engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Integrations synced in parallel within one batch
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,
    /// Upper bound for one adapter call
    #[serde(default = "default_sync_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    /// Wall-clock ceiling for a whole `sync_all_active` batch
    #[serde(default = "default_sync_batch_budget_seconds")]
    pub batch_budget_seconds: u64,
    /// Consecutive retryable failures before an integration is demoted to `error`
    #[serde(default = "default_sync_failure_threshold")]
    pub failure_threshold: u32,
}

/// Time-based trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Local time of day (`HH:MM`) the daily sync fires
    #[serde(default = "default_daily_sync_at")]
    pub daily_sync_at: String,
    /// Delay between the daily sync and the daily aggregation
    #[serde(default = "default_aggregation_lag_minutes")]
    pub aggregation_lag_minutes: u64,
    /// Trailing window re-fetched by the daily sync
    #[serde(default = "default_sync_window_days")]
    pub sync_window_days: u32,
    /// Random delay added before the daily sync starts
    #[serde(default = "default_start_jitter_seconds")]
    pub start_jitter_seconds: u64,
}

/// Platform endpoints and application credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PlatformSettings {
    #[serde(default = "default_meta_graph_base_url")]
    pub meta_graph_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_app_secret: Option<String>,
    /// Long-lived tokens expiring within this many days are exchanged
    #[serde(default = "default_meta_refresh_window_days")]
    pub meta_refresh_window_days: i64,
    #[serde(default = "default_google_oauth_token_url")]
    pub google_oauth_token_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_secret: Option<String>,
    #[serde(default = "default_google_ads_base_url")]
    pub google_ads_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_ads_developer_token: Option<String>,
    #[serde(default = "default_ga4_base_url")]
    pub ga4_base_url: String,
    #[serde(default = "default_naver_searchad_base_url")]
    pub naver_searchad_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            reporting_utc_offset_minutes: default_reporting_utc_offset_minutes(),
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
            platforms: PlatformSettings::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_sync_concurrency(),
            fetch_timeout_seconds: default_sync_fetch_timeout_seconds(),
            batch_budget_seconds: default_sync_batch_budget_seconds(),
            failure_threshold: default_sync_failure_threshold(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            daily_sync_at: default_daily_sync_at(),
            aggregation_lag_minutes: default_aggregation_lag_minutes(),
            sync_window_days: default_sync_window_days(),
            start_jitter_seconds: default_start_jitter_seconds(),
        }
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            meta_graph_base_url: default_meta_graph_base_url(),
            meta_app_id: None,
            meta_app_secret: None,
            meta_refresh_window_days: default_meta_refresh_window_days(),
            google_oauth_token_url: default_google_oauth_token_url(),
            google_client_id: None,
            google_client_secret: None,
            google_ads_base_url: default_google_ads_base_url(),
            google_ads_developer_token: None,
            ga4_base_url: default_ga4_base_url(),
            naver_searchad_base_url: default_naver_searchad_base_url(),
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_secs(self.batch_budget_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidSyncConcurrency {
                value: self.concurrency,
            });
        }
        if self.fetch_timeout_seconds == 0 {
            return Err(ConfigError::InvalidFetchTimeout {
                value: self.fetch_timeout_seconds,
            });
        }
        if self.batch_budget_seconds < self.fetch_timeout_seconds {
            return Err(ConfigError::InvalidBatchBudget {
                budget: self.batch_budget_seconds,
                fetch_timeout: self.fetch_timeout_seconds,
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }
        Ok(())
    }
}

impl PlatformSettings {
    /// Every endpoint must be an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("META_GRAPH_BASE_URL", &self.meta_graph_base_url),
            ("GOOGLE_OAUTH_TOKEN_URL", &self.google_oauth_token_url),
            ("GOOGLE_ADS_BASE_URL", &self.google_ads_base_url),
            ("GA4_BASE_URL", &self.ga4_base_url),
            ("NAVER_SEARCHAD_BASE_URL", &self.naver_searchad_base_url),
        ] {
            let valid = url::Url::parse(value)
                .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Parses [`SchedulerConfig::daily_sync_at`].
    pub fn daily_sync_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.daily_sync_at, "%H:%M").map_err(|_| {
            ConfigError::InvalidDailySyncAt {
                value: self.daily_sync_at.clone(),
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=300).contains(&self.tick_interval_seconds) {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        let sync_at = self.daily_sync_time()?;
        if u64::from(sync_at.num_seconds_from_midnight()) + self.start_jitter_seconds >= 24 * 60 * 60 {
            return Err(ConfigError::SyncStartPastMidnight {
                daily_sync_at: self.daily_sync_at.clone(),
                jitter_seconds: self.start_jitter_seconds,
            });
        }
        if self.sync_window_days == 0 || self.sync_window_days > 31 {
            return Err(ConfigError::InvalidSyncWindow {
                value: self.sync_window_days,
            });
        }
        if self.aggregation_lag_minutes > 12 * 60 {
            return Err(ConfigError::InvalidAggregationLag {
                value: self.aggregation_lag_minutes,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Fixed offset of the reporting timezone.
    pub fn reporting_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.reporting_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date in the reporting timezone at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.reporting_offset()).date_naive()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        let platforms = &mut config.platforms;
        for secret in [
            &mut platforms.meta_app_secret,
            &mut platforms.google_client_secret,
            &mut platforms.google_ads_developer_token,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !(-720..=840).contains(&self.reporting_utc_offset_minutes) {
            return Err(ConfigError::InvalidUtcOffset {
                value: self.reporting_utc_offset_minutes,
            });
        }

        // Google token refresh cannot work without app credentials.
        if !self.is_local_profile() {
            if self.platforms.google_client_id.is_none() {
                return Err(ConfigError::MissingSetting {
                    key: "GOOGLE_CLIENT_ID",
                });
            }
            if self.platforms.google_client_secret.is_none() {
                return Err(ConfigError::MissingSetting {
                    key: "GOOGLE_CLIENT_SECRET",
                });
            }
        }

        self.sync.validate()?;
        self.scheduler.validate()?;
        self.platforms.validate()?;

        Ok(())
    }

    fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/portal_sync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_reporting_utc_offset_minutes() -> i32 {
    540 // KST
}

fn default_sync_concurrency() -> usize {
    4
}

fn default_sync_fetch_timeout_seconds() -> u64 {
    60
}

fn default_sync_batch_budget_seconds() -> u64 {
    1500 // 25 minutes
}

fn default_sync_failure_threshold() -> u32 {
    3
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    60
}

fn default_daily_sync_at() -> String {
    "03:00".to_string()
}

fn default_aggregation_lag_minutes() -> u64 {
    60
}

fn default_sync_window_days() -> u32 {
    7
}

fn default_start_jitter_seconds() -> u64 {
    120
}

fn default_meta_graph_base_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_meta_refresh_window_days() -> i64 {
    7
}

fn default_google_oauth_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_ads_base_url() -> String {
    "https://googleads.googleapis.com/v17".to_string()
}

fn default_ga4_base_url() -> String {
    "https://analyticsdata.googleapis.com/v1beta".to_string()
}

fn default_naver_searchad_base_url() -> String {
    "https://api.searchad.naver.com".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for PORTAL_{key}")]
    InvalidValue { key: String, value: String },
    #[error("no operator tokens configured; set PORTAL_OPERATOR_TOKEN or PORTAL_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("crypto key is missing; set PORTAL_CRYPTO_KEY")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("required setting PORTAL_{key} is missing")]
    MissingSetting { key: &'static str },
    #[error("reporting UTC offset must be between -720 and 840 minutes, got {value}")]
    InvalidUtcOffset { value: i32 },
    #[error("sync concurrency must be between 1 and 64, got {value}")]
    InvalidSyncConcurrency { value: usize },
    #[error("sync fetch timeout must be positive, got {value}")]
    InvalidFetchTimeout { value: u64 },
    #[error("sync batch budget ({budget}s) must be at least the fetch timeout ({fetch_timeout}s)")]
    InvalidBatchBudget { budget: u64, fetch_timeout: u64 },
    #[error("sync failure threshold must be at least 1")]
    InvalidFailureThreshold,
    #[error("scheduler tick interval must be between 10 and 300 seconds, got {value}")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("daily sync time must be HH:MM, got '{value}'")]
    InvalidDailySyncAt { value: String },
    #[error("daily sync at {daily_sync_at} plus up to {jitter_seconds}s start delay runs past local midnight")]
    SyncStartPastMidnight { daily_sync_at: String, jitter_seconds: u64 },
    #[error("sync window must be between 1 and 31 days, got {value}")]
    InvalidSyncWindow { value: u32 },
    #[error("aggregation lag must not exceed 720 minutes, got {value}")]
    InvalidAggregationLag { value: u64 },
}

/// Loads configuration using layered `.env` files and `PORTAL_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`
    /// and finally the process environment, later sources winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut values = Layered(layered);

        let profile = values.text("PROFILE").unwrap_or(profile_hint);

        let operator_tokens = if let Some(tokens) = values.text("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = values.text("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match values.text("CRYPTO_KEY") {
            Some(encoded) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(encoded.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let sync = SyncConfig {
            concurrency: values.parsed("SYNC_CONCURRENCY", default_sync_concurrency)?,
            fetch_timeout_seconds: values
                .parsed("SYNC_FETCH_TIMEOUT_SECONDS", default_sync_fetch_timeout_seconds)?,
            batch_budget_seconds: values
                .parsed("SYNC_BATCH_BUDGET_SECONDS", default_sync_batch_budget_seconds)?,
            failure_threshold: values
                .parsed("SYNC_FAILURE_THRESHOLD", default_sync_failure_threshold)?,
        };

        let scheduler = SchedulerConfig {
            enabled: values.parsed("SCHEDULER_ENABLED", default_scheduler_enabled)?,
            tick_interval_seconds: values.parsed(
                "SCHEDULER_TICK_SECONDS",
                default_scheduler_tick_interval_seconds,
            )?,
            daily_sync_at: values
                .text("DAILY_SYNC_AT")
                .unwrap_or_else(default_daily_sync_at),
            aggregation_lag_minutes: values
                .parsed("AGGREGATION_LAG_MINUTES", default_aggregation_lag_minutes)?,
            sync_window_days: values.parsed("SYNC_WINDOW_DAYS", default_sync_window_days)?,
            start_jitter_seconds: values
                .parsed("SCHEDULER_START_JITTER_SECONDS", default_start_jitter_seconds)?,
        };

        let platforms = PlatformSettings {
            meta_graph_base_url: values
                .text("META_GRAPH_BASE_URL")
                .unwrap_or_else(default_meta_graph_base_url),
            meta_app_id: values.text("META_APP_ID"),
            meta_app_secret: values.text("META_APP_SECRET"),
            meta_refresh_window_days: values
                .parsed("META_REFRESH_WINDOW_DAYS", default_meta_refresh_window_days)?,
            google_oauth_token_url: values
                .text("GOOGLE_OAUTH_TOKEN_URL")
                .unwrap_or_else(default_google_oauth_token_url),
            google_client_id: values.text("GOOGLE_CLIENT_ID"),
            google_client_secret: values.text("GOOGLE_CLIENT_SECRET"),
            google_ads_base_url: values
                .text("GOOGLE_ADS_BASE_URL")
                .unwrap_or_else(default_google_ads_base_url),
            google_ads_developer_token: values.text("GOOGLE_ADS_DEVELOPER_TOKEN"),
            ga4_base_url: values
                .text("GA4_BASE_URL")
                .unwrap_or_else(default_ga4_base_url),
            naver_searchad_base_url: values
                .text("NAVER_SEARCHAD_BASE_URL")
                .unwrap_or_else(default_naver_searchad_base_url),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: values
                .text("API_BIND_ADDR")
                .unwrap_or_else(default_api_bind_addr),
            log_level: values.text("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: values.text("LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: values
                .text("DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: values
                .parsed("DB_MAX_CONNECTIONS", default_db_max_connections)?,
            db_acquire_timeout_ms: values
                .parsed("DB_ACQUIRE_TIMEOUT_MS", default_db_acquire_timeout_ms)?,
            operator_tokens,
            crypto_key,
            reporting_utc_offset_minutes: values.parsed(
                "REPORTING_UTC_OFFSET_MINUTES",
                default_reporting_utc_offset_minutes,
            )?,
            sync,
            scheduler,
            platforms,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

/// Prefix-stripped key/value pairs collected from every layer.
struct Layered(BTreeMap<String, String>);

impl Layered {
    /// Non-empty trimmed value for `key`.
    fn text(&mut self, key: &str) -> Option<String> {
        self.0
            .remove(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&mut self, key: &str, default: fn() -> T) -> Result<T, ConfigError> {
        match self.text(key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
            None => Ok(default()),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            operator_tokens: vec!["token".to_string()],
            crypto_key: Some(vec![1u8; 32]),
            ..AppConfig::default()
        }
    }

    #[test]
    fn defaults_validate_for_local_profile() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn production_profile_requires_google_app_credentials() {
        let config = AppConfig {
            profile: "production".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSetting {
                key: "GOOGLE_CLIENT_ID"
            })
        ));
    }

    #[test]
    fn batch_budget_shorter_than_fetch_timeout_is_rejected() {
        let mut config = valid_config();
        config.sync.fetch_timeout_seconds = 120;
        config.sync.batch_budget_seconds = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatchBudget { .. })
        ));
    }

    #[test]
    fn platform_endpoints_must_be_http_urls() {
        let mut config = valid_config();
        config.platforms.ga4_base_url = "analyticsdata.googleapis.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "GA4_BASE_URL"
        ));
    }

    #[test]
    fn malformed_daily_sync_time_is_rejected() {
        let mut config = valid_config();
        config.scheduler.daily_sync_at = "25:99".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDailySyncAt { .. })
        ));
    }

    #[test]
    fn sync_start_delay_must_stay_within_the_day() {
        let mut config = valid_config();
        config.scheduler.daily_sync_at = "23:59".to_string();
        config.scheduler.start_jitter_seconds = 120;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SyncStartPastMidnight { jitter_seconds: 120, .. })
        ));

        // A lag that crosses midnight is fine; the aggregation follows the sync.
        config.scheduler.daily_sync_at = "23:30".to_string();
        config.scheduler.aggregation_lag_minutes = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn local_date_uses_reporting_offset() {
        let config = valid_config();
        // 2025-03-31 20:00 UTC is already April 1st in KST
        let now = DateTime::parse_from_rfc3339("2025-03-31T20:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        assert_eq!(
            config.local_date(now),
            NaiveDate::from_ymd_opt(2025, 4, 1).expect("date")
        );
    }

    #[test]
    fn redacted_json_masks_secrets() {
        let mut config = valid_config();
        config.platforms.google_client_secret = Some("very-secret".to_string());
        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("very-secret"));
        assert!(!json.contains("\"token\""));
        assert!(json.contains(REDACTED));
    }
}
