//! # Client Metric Handlers
//!
//! Read access to client-facing rows by `(client, period type, period start)`,
//! the contract report generation depends on.

use axum::{
    extract::{Path, State, rejection::PathRejection},
    response::Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, bad_request, not_found};
use crate::models::client_metric::{self, PeriodType};
use crate::server::AppState;

/// Aggregated figures for one client and bucket
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientMetricInfo {
    pub client_id: Uuid,
    #[schema(example = "weekly")]
    pub period_type: String,
    #[schema(example = "2024-05-06")]
    pub period_start: String,
    #[schema(example = "2024-05-12")]
    pub period_end: String,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub sessions: i64,
    pub users: i64,
    pub page_views: i64,
    /// `null` when impressions were zero
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub roas: Option<f64>,
    pub source_record_count: i32,
    #[schema(value_type = Vec<String>)]
    pub platforms: JsonValue,
    pub updated_at: String,
}

impl From<client_metric::Model> for ClientMetricInfo {
    fn from(model: client_metric::Model) -> Self {
        Self {
            client_id: model.client_id,
            period_type: model.period_type,
            period_start: model.period_start.to_string(),
            period_end: model.period_end.to_string(),
            impressions: model.impressions,
            clicks: model.clicks,
            spend: model.spend,
            conversions: model.conversions,
            conversion_value: model.conversion_value,
            sessions: model.sessions,
            users: model.users,
            page_views: model.page_views,
            ctr: model.ctr,
            cpc: model.cpc,
            cpa: model.cpa,
            conversion_rate: model.conversion_rate,
            roas: model.roas,
            source_record_count: model.source_record_count,
            platforms: model.platforms,
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Fetch one client-facing metric row
#[utoipa::path(
    get,
    path = "/clients/{client_id}/metrics/{period_type}/{period_start}",
    security(("bearer_auth" = [])),
    params(
        ("client_id" = Uuid, Path, description = "Client id"),
        ("period_type" = String, Path, description = "weekly or monthly"),
        ("period_start" = String, Path, description = "First day of the bucket (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Metric row", body = ClientMetricInfo),
        (status = 400, description = "Invalid path parameter", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No row for this key", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn get_client_metric(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<(Uuid, String, String)>, PathRejection>,
) -> Result<Json<ClientMetricInfo>, ApiError> {
    let Path((client_id, period_type, period_start)) = path?;
    let period_type: PeriodType = period_type
        .parse()
        .map_err(|err: String| bad_request(&err))?;
    let period_start = NaiveDate::parse_from_str(&period_start, "%Y-%m-%d")
        .map_err(|_| bad_request("period_start must be a YYYY-MM-DD date"))?;

    state
        .client_metrics
        .find_by_key(client_id, period_type, period_start)
        .await?
        .map(|row| Json(row.into()))
        .ok_or_else(|| not_found("Client metric"))
}
