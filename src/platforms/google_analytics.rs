//! Google Analytics 4 adapter
//!
//! Runs a Data API report with the `date` dimension. GA4 has no ad spend; it
//! contributes sessions, users, page views and key events (conversions).

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{
    DailyMetric, FetchError, FetchErrorKind, FetchOutcome, FetchRequest, Platform,
    PlatformAdapter, PlatformConfig, PlatformCredentials, Registry,
    google_oauth::GoogleOAuthClient, http, trait_::ensure_range,
};

const PLATFORM: &str = "google_analytics";

/// Report metrics in request order; `to_daily_metric` relies on the order.
const REPORT_METRICS: [&str; 5] = [
    "sessions",
    "totalUsers",
    "newUsers",
    "screenPageViews",
    "keyEvents",
];

pub struct GoogleAnalyticsAdapter {
    http: reqwest::Client,
    base_url: String,
    oauth: GoogleOAuthClient,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    dimension_values: Vec<ReportValue>,
    metric_values: Vec<ReportValue>,
}

#[derive(Deserialize)]
struct ReportValue {
    #[serde(default)]
    value: String,
}

impl GoogleAnalyticsAdapter {
    pub fn new(http: reqwest::Client, base_url: String, oauth: GoogleOAuthClient) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth,
        }
    }
}

fn property_path(property_id: &str) -> String {
    let id = property_id.trim().trim_start_matches("properties/");
    format!("properties/{id}")
}

fn report_body(from: NaiveDate, to: NaiveDate) -> serde_json::Value {
    json!({
        "dateRanges": [{
            "startDate": from.format("%Y-%m-%d").to_string(),
            "endDate": to.format("%Y-%m-%d").to_string(),
        }],
        "dimensions": [{ "name": "date" }],
        "metrics": REPORT_METRICS.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        "keepEmptyRows": true,
        "limit": 1000,
    })
}

fn metric_i64(row: &ReportRow, idx: usize) -> Option<i64> {
    row.metric_values
        .get(idx)
        .and_then(|v| v.value.parse::<f64>().ok())
        .map(|v| v.round() as i64)
}

fn to_daily_metric(row: &ReportRow) -> Result<DailyMetric, FetchError> {
    let raw_date = row
        .dimension_values
        .first()
        .map(|v| v.value.as_str())
        .unwrap_or_default();
    let date = NaiveDate::parse_from_str(raw_date, "%Y%m%d").map_err(|_| {
        FetchError::transient(format!("GA4 returned unparseable date '{raw_date}'"))
    })?;

    let mut record = DailyMetric::account(date);
    record.sessions = metric_i64(row, 0);
    record.users = metric_i64(row, 1);
    record.new_users = metric_i64(row, 2);
    record.page_views = metric_i64(row, 3);
    record.conversions = row
        .metric_values
        .get(4)
        .and_then(|v| v.value.parse::<f64>().ok());
    Ok(record)
}

#[async_trait]
impl PlatformAdapter for GoogleAnalyticsAdapter {
    /// GA4 has no cheap account probe; minting an access token proves the grant.
    async fn test_connection(&self, credentials: &PlatformCredentials) -> Result<bool, FetchError> {
        let PlatformCredentials::GoogleOauth(creds) = credentials else {
            return Err(FetchError::invalid_config(
                "GA4 integrations require google_oauth credentials",
            ));
        };
        match self.oauth.access_token(creds, Utc::now()).await {
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
        let PlatformCredentials::GoogleOauth(creds) = request.credentials else {
            return Err(FetchError::invalid_config(
                "GA4 integrations require google_oauth credentials",
            ));
        };
        let PlatformConfig::GoogleAnalytics(config) = request.config else {
            return Err(FetchError::invalid_config(
                "integration config is not a google_analytics config",
            ));
        };

        let grant = self.oauth.access_token(creds, Utc::now()).await?;

        let resp = self
            .http
            .post(format!(
                "{}/{}:runReport",
                self.base_url,
                property_path(&config.property_id)
            ))
            .bearer_auth(&grant.access_token)
            .json(&report_body(request.date_from, request.date_to))
            .send()
            .await?;
        let report: RunReportResponse = http::check_response(PLATFORM, resp).await?.json().await?;

        // Keyed by date so the series comes back ordered.
        let mut by_date = BTreeMap::new();
        for row in &report.rows {
            let record = to_daily_metric(row)?;
            by_date.insert(record.date, record);
        }

        Ok(FetchOutcome {
            records: by_date.into_values().collect(),
            refreshed_credentials: grant.refreshed.map(PlatformCredentials::GoogleOauth),
        })
    }
}

/// Registers the GA4 adapter.
pub fn register_google_analytics_adapter(
    registry: &mut Registry,
    adapter: Arc<GoogleAnalyticsAdapter>,
) {
    registry.register(Platform::GoogleAnalytics, adapter);
}
