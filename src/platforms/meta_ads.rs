//! Meta (Facebook/Instagram) Ads adapter
//!
//! Reads account-level daily insights from the Graph API.
//!
//! ## Token lifecycle
//!
//! Integrations hold a long-lived user token (about 60 days) with its expiry.
//! - expired: the fetch fails with `auth_expired` before any request is made
//! - inside the refresh window: the token is exchanged through
//!   `grant_type=fb_exchange_token` and the new token is returned to the engine
//! - otherwise: used as is
//!
//! System-user tokens carry no expiry and are never exchanged.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{
    DailyMetric, FetchError, FetchErrorKind, FetchOutcome, FetchRequest, MetaCredentials,
    Platform, PlatformAdapter, PlatformConfig, PlatformCredentials, Registry,
    http::{self, lenient},
    trait_::ensure_range,
};

const PLATFORM: &str = "meta_ads";
const DEFAULT_CONVERSION_ACTIONS: [&str; 3] = ["purchase", "lead", "complete_registration"];
const MAX_PAGES: usize = 50;
const LONG_LIVED_TOKEN_DAYS: i64 = 60;

pub struct MetaAdsAdapter {
    http: reqwest::Client,
    base_url: String,
    app_id: Option<String>,
    app_secret: Option<String>,
    refresh_window: Duration,
}

#[derive(Deserialize)]
struct InsightsPage {
    #[serde(default)]
    data: Vec<InsightRow>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct InsightRow {
    date_start: NaiveDate,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    impressions: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    clicks: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    spend: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    reach: Option<i64>,
    #[serde(default)]
    actions: Vec<ActionStat>,
    #[serde(default)]
    action_values: Vec<ActionStat>,
}

#[derive(Deserialize)]
struct ActionStat {
    action_type: String,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    value: Option<f64>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl MetaAdsAdapter {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        app_id: Option<String>,
        app_secret: Option<String>,
        refresh_window_days: i64,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            app_secret,
            refresh_window: Duration::days(refresh_window_days),
        }
    }

    /// Returns the token to use and, when exchanged, the credentials to persist.
    async fn usable_token(
        &self,
        creds: &MetaCredentials,
        now: DateTime<Utc>,
    ) -> Result<(String, Option<MetaCredentials>), FetchError> {
        let Some(expires_at) = creds.expires_at else {
            return Ok((creds.access_token.clone(), None));
        };
        if expires_at <= now {
            return Err(FetchError::auth_expired(format!(
                "Meta access token expired at {expires_at}; the integration must be reconnected"
            )));
        }
        if expires_at - now > self.refresh_window {
            return Ok((creds.access_token.clone(), None));
        }

        let (Some(app_id), Some(app_secret)) = (&self.app_id, &self.app_secret) else {
            warn!(%expires_at, "Meta token close to expiry but app credentials are not configured");
            return Ok((creds.access_token.clone(), None));
        };

        match self.exchange(app_id, app_secret, &creds.access_token, now).await {
            Ok(refreshed) => Ok((refreshed.access_token.clone(), Some(refreshed))),
            Err(err) if err.kind == FetchErrorKind::AuthExpired => Err(err),
            Err(err) => {
                // The current token is still valid; retry the exchange next cycle.
                warn!(error = %err, "Meta token exchange failed, continuing with current token");
                Ok((creds.access_token.clone(), None))
            }
        }
    }

    async fn exchange(
        &self,
        app_id: &str,
        app_secret: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<MetaCredentials, FetchError> {
        let resp = self
            .http
            .get(format!("{}/oauth/access_token", self.base_url))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("fb_exchange_token", token),
            ])
            .send()
            .await?;
        let exchanged: ExchangeResponse = check_graph_response(resp).await?.json().await?;
        let lifetime = exchanged
            .expires_in
            .map(Duration::seconds)
            .unwrap_or_else(|| Duration::days(LONG_LIVED_TOKEN_DAYS));
        debug!(expires_in_secs = lifetime.num_seconds(), "exchanged Meta long-lived token");

        Ok(MetaCredentials {
            access_token: exchanged.access_token,
            expires_at: Some(now + lifetime),
        })
    }

    async fn fetch_pages(
        &self,
        account_path: &str,
        token: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InsightRow>, FetchError> {
        let time_range = json!({
            "since": from.format("%Y-%m-%d").to_string(),
            "until": to.format("%Y-%m-%d").to_string(),
        })
        .to_string();

        let first = self
            .http
            .get(format!("{}/{}/insights", self.base_url, account_path))
            .query(&[
                ("level", "account"),
                ("time_increment", "1"),
                ("fields", "impressions,clicks,spend,reach,actions,action_values"),
                ("time_range", time_range.as_str()),
                ("limit", "100"),
                ("access_token", token),
            ])
            .send()
            .await?;
        let mut page: InsightsPage = check_graph_response(first).await?.json().await?;

        let mut rows = Vec::new();
        for _ in 0..MAX_PAGES {
            rows.append(&mut page.data);
            let Some(next) = page.paging.and_then(|p| p.next) else {
                return Ok(rows);
            };
            let resp = self.http.get(next).send().await?;
            page = check_graph_response(resp).await?.json().await?;
        }

        Err(FetchError::transient(format!(
            "Meta insights paging exceeded {MAX_PAGES} pages"
        )))
    }
}

fn account_path(ad_account_id: &str) -> String {
    let id = ad_account_id.trim();
    if id.starts_with("act_") {
        id.to_string()
    } else {
        format!("act_{id}")
    }
}

fn sum_actions(stats: &[ActionStat], wanted: &[String]) -> Option<f64> {
    let matching: Vec<f64> = stats
        .iter()
        .filter(|stat| wanted.iter().any(|w| w == &stat.action_type))
        .filter_map(|stat| stat.value)
        .collect();
    if matching.is_empty() {
        None
    } else {
        Some(matching.iter().sum())
    }
}

fn to_daily_metric(row: InsightRow, conversion_actions: &[String]) -> DailyMetric {
    let mut record = DailyMetric::account(row.date_start);
    record.impressions = row.impressions;
    record.clicks = row.clicks;
    record.spend = row.spend;
    record.reach = row.reach;
    record.conversions = sum_actions(&row.actions, conversion_actions);
    record.conversion_value = sum_actions(&row.action_values, conversion_actions);
    record
}

/// Graph API errors arrive as 4xx bodies carrying a numeric code.
async fn check_graph_response(resp: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry = http::retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    Err(classify_graph_error(status, retry, &body))
}

fn classify_graph_error(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> FetchError {
    let Ok(GraphErrorEnvelope { error }) = serde_json::from_str::<GraphErrorEnvelope>(body) else {
        return http::classify_status(PLATFORM, status, retry_after, body);
    };
    let message = format!("Meta Graph error {:?}: {}", error.code, error.message);
    match error.code {
        Some(190) | Some(102) => FetchError::auth_expired(message),
        Some(4) | Some(17) | Some(32) | Some(613) | Some(80004) => {
            FetchError::rate_limited(retry_after, message)
        }
        Some(100) => FetchError::invalid_config(message),
        _ if error.error_type.as_deref() == Some("OAuthException") => {
            FetchError::auth_expired(message)
        }
        _ => http::classify_status(PLATFORM, status, retry_after, body),
    }
}

#[async_trait]
impl PlatformAdapter for MetaAdsAdapter {
    async fn test_connection(&self, credentials: &PlatformCredentials) -> Result<bool, FetchError> {
        let PlatformCredentials::Meta(creds) = credentials else {
            return Err(FetchError::invalid_config(
                "Meta Ads integrations require meta credentials",
            ));
        };
        if creds.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Ok(false);
        }

        let resp = self
            .http
            .get(format!("{}/me", self.base_url))
            .query(&[("fields", "id"), ("access_token", creds.access_token.as_str())])
            .send()
            .await?;
        match check_graph_response(resp).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind == FetchErrorKind::AuthExpired => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, request), fields(platform = PLATFORM, from = %request.date_from, to = %request.date_to))]
    async fn fetch_daily_metrics(
        &self,
        request: FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        ensure_range(request.date_from, request.date_to)?;
        let PlatformCredentials::Meta(creds) = request.credentials else {
            return Err(FetchError::invalid_config(
                "Meta Ads integrations require meta credentials",
            ));
        };
        let PlatformConfig::MetaAds(config) = request.config else {
            return Err(FetchError::invalid_config(
                "integration config is not a meta_ads config",
            ));
        };

        let (token, refreshed) = self.usable_token(creds, Utc::now()).await?;

        let conversion_actions: Vec<String> = if config.conversion_action_types.is_empty() {
            DEFAULT_CONVERSION_ACTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            config.conversion_action_types.clone()
        };

        let rows = self
            .fetch_pages(
                &account_path(&config.ad_account_id),
                &token,
                request.date_from,
                request.date_to,
            )
            .await?;

        let mut by_date = BTreeMap::new();
        for row in rows {
            let record = to_daily_metric(row, &conversion_actions);
            by_date.insert(record.date, record);
        }

        Ok(FetchOutcome {
            records: by_date.into_values().collect(),
            refreshed_credentials: refreshed.map(PlatformCredentials::Meta),
        })
    }
}

/// Registers the Meta Ads adapter.
pub fn register_meta_ads_adapter(registry: &mut Registry, adapter: Arc<MetaAdsAdapter>) {
    registry.register(Platform::MetaAds, adapter);
}
