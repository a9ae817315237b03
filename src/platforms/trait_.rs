//! Platform adapter trait definition
//!
//! Defines the interface every platform adapter implements, the normalized
//! daily record it produces and the typed error it raises.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{PlatformConfig, PlatformCredentials};
use crate::models::daily_platform_metric::ACCOUNT_DIMENSION;

/// Typed adapter failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{}: {message}", kind.as_str())]
pub struct FetchError {
    #[serde(flatten)]
    pub kind: FetchErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Platform quota exhausted; retry next cycle
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Credentials were rejected or could not be refreshed; needs re-auth
    AuthExpired,
    /// Integration config or credential shape is wrong
    InvalidConfig,
    /// Network failure, timeout, upstream 5xx or unreadable response
    Transient,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::RateLimited { .. } => "rate_limited",
            FetchErrorKind::AuthExpired => "auth_expired",
            FetchErrorKind::InvalidConfig => "invalid_config",
            FetchErrorKind::Transient => "transient",
        }
    }
}

impl FetchError {
    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after_secs: Option<u64>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited { retry_after_secs }, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::AuthExpired, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidConfig, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

}

/// One calendar day of normalized metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    /// Sub-dimension key; empty for the account-level total
    pub dimension: String,
    pub impressions: Option<i64>,
    pub clicks: Option<i64>,
    pub spend: Option<f64>,
    pub conversions: Option<f64>,
    pub conversion_value: Option<f64>,
    pub reach: Option<i64>,
    pub sessions: Option<i64>,
    pub users: Option<i64>,
    pub new_users: Option<i64>,
    pub page_views: Option<i64>,
    /// Source payload kept for audit
    pub raw: Option<JsonValue>,
}

impl DailyMetric {
    /// Empty account-level record for `date`.
    pub fn account(date: NaiveDate) -> Self {
        Self {
            date,
            dimension: ACCOUNT_DIMENSION.to_string(),
            impressions: None,
            clicks: None,
            spend: None,
            conversions: None,
            conversion_value: None,
            reach: None,
            sessions: None,
            users: None,
            new_users: None,
            page_views: None,
            raw: None,
        }
    }
}

/// Inputs for one fetch. Bounds are inclusive dates in the reporting timezone.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub credentials: &'a PlatformCredentials,
    pub config: &'a PlatformConfig,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<DailyMetric>,
    /// Set when the adapter refreshed or exchanged tokens during the call;
    /// the engine persists them with the fetched rows.
    pub refreshed_credentials: Option<PlatformCredentials>,
}

impl FetchOutcome {
    pub fn records(records: Vec<DailyMetric>) -> Self {
        Self {
            records,
            refreshed_credentials: None,
        }
    }
}

/// Contract implemented by every platform adapter.
///
/// Adapters are stateless apart from their HTTP client. A fetch either yields
/// the whole requested range or fails; partial ranges are never returned.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Minimal read-only call validating `credentials`.
    ///
    /// Rejected credentials yield `Ok(false)`; only failures that say nothing
    /// about the credentials (network, quota) are returned as errors.
    async fn test_connection(&self, credentials: &PlatformCredentials) -> Result<bool, FetchError>;

    /// Fetches one record per day (per dimension) for the requested range.
    async fn fetch_daily_metrics(
        &self,
        request: FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Rejects a series with dates outside `[from, to]` or repeated (date, dimension) keys.
pub fn validate_series(
    records: &[DailyMetric],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(), FetchError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if record.date < from || record.date > to {
            return Err(FetchError::transient(format!(
                "adapter returned {} outside requested range {from}..={to}",
                record.date
            )));
        }
        if !seen.insert((record.date, record.dimension.as_str())) {
            return Err(FetchError::transient(format!(
                "adapter returned duplicate rows for {} '{}'",
                record.date, record.dimension
            )));
        }
    }
    Ok(())
}

/// Rejects inverted ranges before any network call.
pub fn ensure_range(from: NaiveDate, to: NaiveDate) -> Result<(), FetchError> {
    if from > to {
        return Err(FetchError::invalid_config(format!(
            "date_from {from} is after date_to {to}"
        )));
    }
    Ok(())
}
