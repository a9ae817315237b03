//! Google Ads adapter
//!
//! Fetches account-level daily performance with a GAQL query over the
//! `customer` resource through `googleAds:searchStream`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{
    DailyMetric, FetchError, FetchOutcome, FetchRequest, Platform, PlatformAdapter,
    PlatformConfig, PlatformCredentials, Registry,
    google_oauth::GoogleOAuthClient,
    http::{self, lenient},
    trait_::ensure_range,
};

const PLATFORM: &str = "google_ads";

pub struct GoogleAdsAdapter {
    http: reqwest::Client,
    base_url: String,
    developer_token: Option<String>,
    oauth: GoogleOAuthClient,
}

#[derive(Deserialize)]
struct SearchStreamBatch {
    #[serde(default)]
    results: Vec<GoogleAdsRow>,
}

#[derive(Deserialize)]
struct GoogleAdsRow {
    segments: Segments,
    #[serde(default)]
    metrics: RowMetrics,
}

#[derive(Deserialize)]
struct Segments {
    date: NaiveDate,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowMetrics {
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    impressions: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    clicks: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    cost_micros: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    conversions: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    conversions_value: Option<f64>,
}

impl GoogleAdsAdapter {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        developer_token: Option<String>,
        oauth: GoogleOAuthClient,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            developer_token,
            oauth,
        }
    }

    fn developer_token(&self) -> Result<&str, FetchError> {
        self.developer_token
            .as_deref()
            .ok_or_else(|| FetchError::invalid_config("Google Ads developer token is not configured"))
    }
}

/// Customer ids are often entered as `123-456-7890`; the API wants digits only.
fn normalize_customer_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn daily_query(from: NaiveDate, to: NaiveDate) -> String {
    format!(
        "SELECT segments.date, metrics.impressions, metrics.clicks, metrics.cost_micros, \
         metrics.conversions, metrics.conversions_value \
         FROM customer \
         WHERE segments.date BETWEEN '{}' AND '{}'",
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    )
}

fn to_daily_metric(row: GoogleAdsRow) -> DailyMetric {
    let mut record = DailyMetric::account(row.segments.date);
    record.impressions = row.metrics.impressions;
    record.clicks = row.metrics.clicks;
    record.spend = row.metrics.cost_micros.map(|micros| micros as f64 / 1_000_000.0);
    record.conversions = row.metrics.conversions;
    record.conversion_value = row.metrics.conversions_value;
    record
}

#[async_trait]
impl PlatformAdapter for GoogleAdsAdapter {
    async fn test_connection(&self, credentials: &PlatformCredentials) -> Result<bool, FetchError> {
        let PlatformCredentials::GoogleOauth(creds) = credentials else {
            return Err(FetchError::invalid_config(
                "Google Ads integrations require google_oauth credentials",
            ));
        };

        let grant = match self.oauth.access_token(creds, Utc::now()).await {
            Ok(grant) => grant,
            Err(err) if err.kind == super::FetchErrorKind::AuthExpired => return Ok(false),
            Err(err) => return Err(err),
        };

        let resp = self
            .http
            .get(format!("{}/customers:listAccessibleCustomers", self.base_url))
            .bearer_auth(&grant.access_token)
            .header("developer-token", self.developer_token()?)
            .send()
            .await?;

        match http::check_response(PLATFORM, resp).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind == super::FetchErrorKind::AuthExpired => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, request), fields(platform = PLATFORM, from = %request.date_from, to = %request.date_to))]
    async fn fetch_daily_metrics(
        &self,
        request: FetchRequest<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        ensure_range(request.date_from, request.date_to)?;
        let PlatformCredentials::GoogleOauth(creds) = request.credentials else {
            return Err(FetchError::invalid_config(
                "Google Ads integrations require google_oauth credentials",
            ));
        };
        let PlatformConfig::GoogleAds(config) = request.config else {
            return Err(FetchError::invalid_config(
                "integration config is not a google_ads config",
            ));
        };

        let customer_id = normalize_customer_id(&config.customer_id);
        if customer_id.is_empty() {
            return Err(FetchError::invalid_config("Google Ads customer id is empty"));
        }

        let grant = self.oauth.access_token(creds, Utc::now()).await?;

        let mut builder = self
            .http
            .post(format!(
                "{}/customers/{}/googleAds:searchStream",
                self.base_url, customer_id
            ))
            .bearer_auth(&grant.access_token)
            .header("developer-token", self.developer_token()?)
            .json(&json!({ "query": daily_query(request.date_from, request.date_to) }));
        if let Some(login) = config.login_customer_id.as_deref() {
            builder = builder.header("login-customer-id", normalize_customer_id(login));
        }

        let resp = http::check_response(PLATFORM, builder.send().await?).await?;
        let batches: Vec<SearchStreamBatch> = resp.json().await?;

        let records: Vec<DailyMetric> = batches
            .into_iter()
            .flat_map(|batch| batch.results)
            .map(to_daily_metric)
            .collect();
        debug!(rows = records.len(), customer_id = %customer_id, "fetched Google Ads rows");

        Ok(FetchOutcome {
            records,
            refreshed_credentials: grant.refreshed.map(PlatformCredentials::GoogleOauth),
        })
    }
}

/// Registers the Google Ads adapter.
pub fn register_google_ads_adapter(registry: &mut Registry, adapter: Arc<GoogleAdsAdapter>) {
    registry.register(Platform::GoogleAds, adapter);
}
