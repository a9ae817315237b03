//! # Aggregation Handler

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};

use crate::aggregator::{AggregateReport, AggregateScope};
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::server::AppState;

/// Aggregate one closed bucket for one or all clients
///
/// A rejected scope (inverted or still-open period, unknown client) is
/// answered with `422` and the report describing why.
#[utoipa::path(
    post,
    path = "/aggregate",
    security(("bearer_auth" = [])),
    request_body = AggregateScope,
    responses(
        (status = 200, description = "Aggregation report", body = AggregateReport),
        (status = 400, description = "Malformed body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 422, description = "Scope rejected or every client failed", body = AggregateReport)
    ),
    tag = "aggregation"
)]
pub async fn aggregate(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    body: Result<Json<AggregateScope>, JsonRejection>,
) -> Result<(StatusCode, Json<AggregateReport>), ApiError> {
    let Json(scope) = body?;
    let report = state.aggregator.aggregate(&scope).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(report)))
}
