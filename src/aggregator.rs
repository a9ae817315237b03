//! Metrics Aggregator
//!
//! Sums account-level daily rows of every integration a client owns into one
//! client-facing row per bucket, then derives rates from the sums.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::client_metric::{self, PeriodType};
use crate::models::daily_platform_metric;
use crate::periods::PeriodBucket;
use crate::repositories::{
    ClientMetricRepository, ClientRepository, DailyMetricRepository, UpsertKind,
};
use crate::telemetry::AGGREGATIONS_TOTAL;

/// Clients and the single bucket one `aggregate` call covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregateScope {
    /// All clients when absent
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub period_type: PeriodType,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl AggregateScope {
    pub fn for_bucket(bucket: PeriodBucket, client_id: Option<Uuid>) -> Self {
        Self {
            client_id,
            period_type: bucket.period_type,
            date_from: bucket.start,
            date_to: bucket.end,
        }
    }
}

/// Failure for one client, or for the whole call when `client_id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregateError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregateReport {
    pub success: bool,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<AggregateError>,
    /// Clients whose row for the bucket was created by this call
    pub inserted_clients: Vec<Uuid>,
    /// Clients whose existing row was rewritten by this call
    pub updated_clients: Vec<Uuid>,
}

impl AggregateReport {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![AggregateError {
                client_id: None,
                message: message.into(),
            }],
            ..Self::default()
        }
    }
}

/// Additive sums over a set of daily rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub sessions: i64,
    pub users: i64,
    pub page_views: i64,
    pub source_records: usize,
    pub platforms: BTreeSet<String>,
}

/// Rates computed once from [`Totals`]; `None` where the denominator is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedRates {
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub roas: Option<f64>,
}

pub fn summarize(rows: &[daily_platform_metric::Model]) -> Totals {
    let mut totals = Totals::default();
    for row in rows {
        totals.impressions += row.impressions.unwrap_or(0);
        totals.clicks += row.clicks.unwrap_or(0);
        totals.spend += row.spend.unwrap_or(0.0);
        totals.conversions += row.conversions.unwrap_or(0.0);
        totals.conversion_value += row.conversion_value.unwrap_or(0.0);
        totals.sessions += row.sessions.unwrap_or(0);
        totals.users += row.users.unwrap_or(0);
        totals.page_views += row.page_views.unwrap_or(0);
        totals.source_records += 1;
        totals.platforms.insert(row.platform.clone());
    }
    totals
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

impl Totals {
    pub fn rates(&self) -> DerivedRates {
        let impressions = self.impressions as f64;
        let clicks = self.clicks as f64;
        DerivedRates {
            ctr: ratio(clicks, impressions),
            cpc: ratio(self.spend, clicks),
            cpa: ratio(self.spend, self.conversions),
            conversion_rate: ratio(self.conversions, clicks),
            roas: ratio(self.conversion_value, self.spend),
        }
    }

    fn into_row(
        self,
        client_id: Uuid,
        period_type: PeriodType,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> client_metric::Model {
        let rates = self.rates();
        let now = Utc::now().into();
        client_metric::Model {
            id: Uuid::new_v4(),
            client_id,
            period_type: period_type.as_str().to_string(),
            period_start,
            period_end,
            impressions: self.impressions,
            clicks: self.clicks,
            spend: self.spend,
            conversions: self.conversions,
            conversion_value: self.conversion_value,
            sessions: self.sessions,
            users: self.users,
            page_views: self.page_views,
            ctr: rates.ctr,
            cpc: rates.cpc,
            cpa: rates.cpa,
            conversion_rate: rates.conversion_rate,
            roas: rates.roas,
            source_record_count: i32::try_from(self.source_records).unwrap_or(i32::MAX),
            platforms: json!(self.platforms),
            created_at: now,
            updated_at: now,
        }
    }
}

enum ClientResult {
    Written(UpsertKind),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    clients: ClientRepository,
    daily: DailyMetricRepository,
    client_metrics: ClientMetricRepository,
    reporting_offset: FixedOffset,
}

impl MetricsAggregator {
    /// `reporting_offset` decides which day counts as "today" when checking
    /// that a period has closed.
    pub fn new(db: Arc<DatabaseConnection>, reporting_offset: FixedOffset) -> Self {
        Self {
            clients: ClientRepository::new(db.clone()),
            daily: DailyMetricRepository::new(db.clone()),
            client_metrics: ClientMetricRepository::new(db),
            reporting_offset,
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now()
            .with_timezone(&self.reporting_offset)
            .date_naive()
    }

    /// Aggregates `scope` as of the current date in the reporting timezone.
    pub async fn aggregate(&self, scope: &AggregateScope) -> AggregateReport {
        self.aggregate_as_of(scope, self.today()).await
    }

    /// Aggregates `scope`, rejecting it unless its bucket closed before `today`.
    ///
    /// Each client in scope gets one row for the period, summed from
    /// account-level daily rows across all of its integrations. Rates are
    /// derived from the pooled totals. Clients with no daily rows are skipped.
    ///
    /// # Arguments
    ///
    /// * `scope` - Period type, inclusive window and optional single client
    /// * `today` - Current date in the reporting timezone
    ///
    /// # Returns
    ///
    /// An `AggregateReport` with inserted, updated and skipped counts. A failing
    /// client is listed in `errors` without stopping the rest; `success` is
    /// false only when the scope is rejected or every client failed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use chrono::NaiveDate;
    /// use portal_sync::{
    ///     aggregator::{AggregateScope, MetricsAggregator},
    ///     config::AppConfig,
    ///     db::init_pool,
    ///     periods::previous_completed_week,
    /// };
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = AppConfig::default();
    ///     let db = Arc::new(init_pool(&config).await?);
    ///     let aggregator = MetricsAggregator::new(db, config.reporting_offset());
    ///
    ///     let today = NaiveDate::from_ymd_opt(2024, 5, 14).unwrap();
    ///     let scope = AggregateScope::for_bucket(previous_completed_week(today), None);
    ///     let report = aggregator.aggregate_as_of(&scope, today).await;
    ///     println!("{} inserted, {} updated", report.inserted, report.updated);
    ///     Ok(())
    /// }
    /// ```
    #[instrument(skip(self), fields(period_type = %scope.period_type, from = %scope.date_from, to = %scope.date_to))]
    pub async fn aggregate_as_of(&self, scope: &AggregateScope, today: NaiveDate) -> AggregateReport {
        if scope.date_from > scope.date_to {
            warn!("rejected inverted aggregation window");
            return AggregateReport::rejected(format!(
                "date_from {} is after date_to {}",
                scope.date_from, scope.date_to
            ));
        }
        if scope.date_to >= today {
            warn!(%today, "rejected aggregation of an open period");
            return AggregateReport::rejected(format!(
                "period ending {} has not closed yet (today is {today})",
                scope.date_to
            ));
        }

        let client_ids = match scope.client_id {
            Some(client_id) => match self.clients.find_by_id(client_id).await {
                Ok(Some(_)) => vec![client_id],
                Ok(None) => {
                    return AggregateReport::rejected(format!("client {client_id} does not exist"));
                }
                Err(err) => {
                    error!(error = %err, "failed to resolve aggregation scope");
                    return AggregateReport::rejected(format!("scope resolution failed: {err}"));
                }
            },
            None => match self.clients.list_ids().await {
                Ok(ids) => ids,
                Err(err) => {
                    error!(error = %err, "failed to resolve aggregation scope");
                    return AggregateReport::rejected(format!("scope resolution failed: {err}"));
                }
            },
        };

        let mut report = AggregateReport::default();
        for client_id in &client_ids {
            match self.aggregate_client(*client_id, scope).await {
                Ok(ClientResult::Written(UpsertKind::Inserted)) => {
                    report.inserted += 1;
                    report.inserted_clients.push(*client_id);
                }
                Ok(ClientResult::Written(UpsertKind::Updated)) => {
                    report.updated += 1;
                    report.updated_clients.push(*client_id);
                }
                Ok(ClientResult::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(client_id = %client_id, error = %err, "client aggregation failed");
                    report.errors.push(AggregateError {
                        client_id: Some(*client_id),
                        message: err.to_string(),
                    });
                }
            }
        }
        report.success = client_ids.is_empty() || report.errors.len() < client_ids.len();

        let period_type = scope.period_type.as_str();
        for (outcome, count) in [
            ("inserted", report.inserted),
            ("updated", report.updated),
            ("skipped", report.skipped),
            ("error", report.errors.len()),
        ] {
            counter!(AGGREGATIONS_TOTAL, "period_type" => period_type, "outcome" => outcome)
                .increment(count as u64);
        }
        info!(
            clients = client_ids.len(),
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            "aggregation finished"
        );
        report
    }

    async fn aggregate_client(
        &self,
        client_id: Uuid,
        scope: &AggregateScope,
    ) -> anyhow::Result<ClientResult> {
        let rows = self
            .daily
            .account_rows_for_client(client_id, scope.date_from, scope.date_to)
            .await?;
        if rows.is_empty() {
            debug!(client_id = %client_id, "no daily rows in window");
            return Ok(ClientResult::Skipped);
        }

        let row = summarize(&rows).into_row(
            client_id,
            scope.period_type,
            scope.date_from,
            scope.date_to,
        );
        let kind = self.client_metrics.upsert(row).await?;
        Ok(ClientResult::Written(kind))
    }
}
