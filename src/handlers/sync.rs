//! # Batch Sync Handler

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, bad_request};
use crate::periods::trailing_window;
use crate::server::AppState;
use crate::sync_engine::SyncAllReport;

/// Optional sync window; missing bounds fall back to the trailing window
#[derive(Debug, Default, Deserialize)]
pub struct SyncRangeQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

pub(crate) fn resolve_range(
    state: &AppState,
    range: &SyncRangeQuery,
) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let today = state.config.local_date(Utc::now());
    let (default_from, default_to) = trailing_window(today, state.config.scheduler.sync_window_days);
    let date_from = range.date_from.unwrap_or(default_from);
    let date_to = range.date_to.unwrap_or(default_to);
    if date_from > date_to {
        return Err(bad_request("date_from must not be after date_to").with_details(
            serde_json::json!({ "date_from": date_from, "date_to": date_to }),
        ));
    }
    Ok((date_from, date_to))
}

/// Sync every active integration now
#[utoipa::path(
    post,
    path = "/sync",
    security(("bearer_auth" = [])),
    params(
        ("date_from" = Option<String>, Query, description = "First day (YYYY-MM-DD); defaults to the trailing window"),
        ("date_to" = Option<String>, Query, description = "Last day (YYYY-MM-DD); defaults to yesterday")
    ),
    responses(
        (status = 200, description = "Per-integration results", body = SyncAllReport),
        (status = 400, description = "Invalid date range", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_all(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<SyncRangeQuery>, QueryRejection>,
) -> Result<Json<SyncAllReport>, ApiError> {
    let Query(range) = query?;
    let (date_from, date_to) = resolve_range(&state, &range)?;
    Ok(Json(state.engine.sync_all_active(date_from, date_to).await))
}
