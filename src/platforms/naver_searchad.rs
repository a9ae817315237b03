//! Naver Search Ads adapter
//!
//! Serves both `naver_searchad` and the legacy `naver_ads` identifier. Every
//! request carries an HMAC-SHA256 signature over `"{timestamp}.{METHOD}.{path}"`
//! keyed with the license secret.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{NaiveDate, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{
    DailyMetric, FetchError, FetchErrorKind, FetchOutcome, FetchRequest, NaverSearchAdCredentials,
    Platform, PlatformAdapter, PlatformConfig, PlatformCredentials, Registry,
    http::{self, lenient},
    trait_::ensure_range,
};

type HmacSha256 = Hmac<Sha256>;

const PLATFORM: &str = "naver_searchad";
const CAMPAIGNS_PATH: &str = "/ncc/campaigns";
const STATS_PATH: &str = "/stats";
const STATS_FIELDS: [&str; 5] = ["impCnt", "clkCnt", "salesAmt", "ccnt", "convAmt"];
/// Campaign ids per stats request.
const IDS_PER_REQUEST: usize = 50;

pub struct NaverSearchAdAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Campaign {
    ncc_campaign_id: String,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    data: Vec<StatRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatRow {
    date_start: NaiveDate,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    imp_cnt: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    clk_cnt: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    sales_amt: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    ccnt: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    conv_amt: Option<f64>,
}

/// Base64 HMAC-SHA256 of `"{timestamp}.{method}.{path}"`.
fn sign(secret: &str, timestamp: &str, method: &str, path: &str) -> Result<String, FetchError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| FetchError::invalid_config("Naver secret key is not a usable HMAC key"))?;
    mac.update(format!("{timestamp}.{method}.{path}").as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn add_opt_i64(acc: &mut Option<i64>, value: Option<i64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0) + v);
    }
}

fn add_opt_f64(acc: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
}

/// Sums campaign-level stat rows into one account-level record per day.
fn sum_by_day(rows: Vec<StatRow>) -> Vec<DailyMetric> {
    let mut by_date: BTreeMap<NaiveDate, DailyMetric> = BTreeMap::new();
    for row in rows {
        let record = by_date
            .entry(row.date_start)
            .or_insert_with(|| DailyMetric::account(row.date_start));
        add_opt_i64(&mut record.impressions, row.imp_cnt);
        add_opt_i64(&mut record.clicks, row.clk_cnt);
        add_opt_f64(&mut record.spend, row.sales_amt);
        add_opt_f64(&mut record.conversions, row.ccnt);
        add_opt_f64(&mut record.conversion_value, row.conv_amt);
    }
    by_date.into_values().collect()
}

impl NaverSearchAdAdapter {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn signed_get(
        &self,
        creds: &NaverSearchAdCredentials,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, FetchError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(&creds.secret_key, &timestamp, "GET", path)?;
        Ok(self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("X-Timestamp", timestamp)
            .header("X-API-KEY", &creds.api_key)
            .header("X-Customer", &creds.customer_id)
            .header("X-Signature", signature))
    }

    async fn list_campaign_ids(
        &self,
        creds: &NaverSearchAdCredentials,
    ) -> Result<Vec<String>, FetchError> {
        let resp = self.signed_get(creds, CAMPAIGNS_PATH)?.send().await?;
        let campaigns: Vec<Campaign> = http::check_response(PLATFORM, resp).await?.json().await?;
        Ok(campaigns.into_iter().map(|c| c.ncc_campaign_id).collect())
    }

    async fn fetch_stats(
        &self,
        creds: &NaverSearchAdCredentials,
        ids: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StatRow>, FetchError> {
        let fields = json!(STATS_FIELDS).to_string();
        let time_range = json!({
            "since": from.format("%Y-%m-%d").to_string(),
            "until": to.format("%Y-%m-%d").to_string(),
        })
        .to_string();

        let mut rows = Vec::new();
        for chunk in ids.chunks(IDS_PER_REQUEST) {
            let resp = self
                .signed_get(creds, STATS_PATH)?
                .query(&[
                    ("ids", chunk.join(",").as_str()),
                    ("fields", fields.as_str()),
                    ("timeRange", time_range.as_str()),
                    ("timeIncrement", "1"),
                ])
                .send()
                .await?;
            let mut page: StatsResponse = http::check_response(PLATFORM, resp).await?.json().await?;
            rows.append(&mut page.data);
        }
        Ok(rows)
    }
}

#[async_trait]
impl PlatformAdapter for NaverSearchAdAdapter {
    async fn test_connection(&self, credentials: &PlatformCredentials) -> Result<bool, FetchError> {
        let PlatformCredentials::NaverSearchad(creds) = credentials else {
            return Err(FetchError::invalid_config(
                "Naver integrations require naver_searchad credentials",
            ));
        };
        match self.list_campaign_ids(creds).await {
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
        let PlatformCredentials::NaverSearchad(creds) = request.credentials else {
            return Err(FetchError::invalid_config(
                "Naver integrations require naver_searchad credentials",
            ));
        };
        let PlatformConfig::NaverSearchad(config) = request.config else {
            return Err(FetchError::invalid_config(
                "integration config is not a naver_searchad config",
            ));
        };

        let ids = if config.campaign_ids.is_empty() {
            self.list_campaign_ids(creds).await?
        } else {
            config.campaign_ids.clone()
        };
        if ids.is_empty() {
            debug!(customer_id = %creds.customer_id, "Naver account has no campaigns");
            return Ok(FetchOutcome::records(Vec::new()));
        }

        let rows = self
            .fetch_stats(creds, &ids, request.date_from, request.date_to)
            .await?;
        let records = sum_by_day(rows);
        debug!(campaigns = ids.len(), days = records.len(), "fetched Naver stats");

        Ok(FetchOutcome::records(records))
    }
}

/// Registers the adapter under both Naver identifiers.
pub fn register_naver_searchad_adapter(registry: &mut Registry, adapter: Arc<NaverSearchAdAdapter>) {
    registry.register(Platform::NaverSearchad, adapter.clone());
    registry.register(Platform::NaverAds, adapter);
}
