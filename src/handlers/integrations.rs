//! # Integration API Handlers
//!
//! Administrative endpoints for creating, deleting, testing and syncing a
//! single integration.

use axum::{
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, bad_request, not_found};
use crate::handlers::sync::{SyncRangeQuery, resolve_range};
use crate::models::{integration, sync_log};
use crate::platforms::{Platform, PlatformConfig, PlatformCredentials};
use crate::repositories::{NewIntegration, StoreError};
use crate::server::AppState;
use crate::sync_engine::{ConnectionCheck, SyncOutcome};

const DEFAULT_LOG_LIMIT: u64 = 50;
const MAX_LOG_LIMIT: u64 = 200;

/// Request body for creating an integration
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIntegrationRequest {
    pub client_id: Uuid,
    #[schema(example = "meta_ads")]
    pub platform: String,
    #[schema(example = "Acme Meta account")]
    pub display_name: String,
    /// Credential bundle tagged by `kind`
    #[schema(value_type = Object, example = json!({"kind": "meta", "access_token": "EAAB..."}))]
    pub credentials: JsonValue,
    /// Config bundle tagged by `platform`
    #[schema(value_type = Object, example = json!({"platform": "meta_ads", "ad_account_id": "act_123"}))]
    pub config: JsonValue,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

/// Integration as exposed over HTTP; credentials are never returned
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntegrationInfo {
    pub id: Uuid,
    pub client_id: Uuid,
    #[schema(example = "meta_ads")]
    pub platform: String,
    pub display_name: String,
    #[schema(example = "inactive")]
    pub status: String,
    #[schema(value_type = Object)]
    pub config: JsonValue,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
    pub last_sync_at: Option<String>,
    pub created_at: String,
}

impl From<integration::Model> for IntegrationInfo {
    fn from(model: integration::Model) -> Self {
        Self {
            id: model.id,
            client_id: model.client_id,
            platform: model.platform,
            display_name: model.display_name,
            status: model.status,
            config: model.config,
            consecutive_failures: model.consecutive_failures,
            last_error: model.last_error,
            last_sync_at: model.last_sync_at.map(|dt| dt.to_rfc3339()),
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

/// One sync attempt
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncLogInfo {
    pub id: Uuid,
    pub date_from: String,
    pub date_to: String,
    pub record_count: i32,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}

impl From<sync_log::Model> for SyncLogInfo {
    fn from(model: sync_log::Model) -> Self {
        Self {
            id: model.id,
            date_from: model.date_from.to_string(),
            date_to: model.date_to.to_string(),
            record_count: model.record_count,
            success: model.success,
            error_kind: model.error_kind,
            error_message: model.error_message,
            duration_ms: model.duration_ms,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncLogsResponse {
    pub integration_id: Uuid,
    pub logs: Vec<SyncLogInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SyncLogsQuery {
    pub limit: Option<u64>,
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::ClientNotFound(_) => not_found("Client"),
        StoreError::IntegrationGone(_) => not_found("Integration"),
        StoreError::InvalidBundle(message) => bad_request(&message),
        StoreError::Db(db_err) => ApiError::from(db_err),
        StoreError::Crypto(err) => ApiError::from(anyhow::Error::from(err)),
    }
}

/// Create an integration in `inactive` status
#[utoipa::path(
    post,
    path = "/integrations",
    security(("bearer_auth" = [])),
    request_body = CreateIntegrationRequest,
    responses(
        (status = 201, description = "Integration created", body = IntegrationInfo),
        (status = 400, description = "Unknown platform or malformed bundle", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Client not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn create_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    body: Result<Json<CreateIntegrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IntegrationInfo>), ApiError> {
    let Json(request) = body?;

    let platform: Platform = request
        .platform
        .parse()
        .map_err(|err: crate::platforms::UnknownPlatform| bad_request(&err.to_string()))?;
    let credentials: PlatformCredentials = serde_json::from_value(request.credentials)
        .map_err(|e| bad_request(&format!("Invalid credentials bundle: {e}")))?;
    let config: PlatformConfig = serde_json::from_value(request.config)
        .map_err(|e| bad_request(&format!("Invalid config bundle: {e}")))?;
    if request.display_name.trim().is_empty() {
        return Err(bad_request("display_name must not be empty"));
    }

    let created = state
        .integrations
        .create(NewIntegration {
            client_id: request.client_id,
            platform,
            display_name: request.display_name,
            credentials,
            config,
            created_by: request.created_by,
        })
        .await
        .map_err(store_error)?;

    tracing::info!(integration_id = %created.id, platform = %created.platform, "integration created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Delete an integration with its daily rows and sync logs
#[utoipa::path(
    delete,
    path = "/integrations/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Integration id")),
    responses(
        (status = 204, description = "Integration deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn delete_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path?;
    if state.integrations.delete(id).await.map_err(store_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Integration"))
    }
}

/// Verify stored credentials against the platform
#[utoipa::path(
    post,
    path = "/integrations/{id}/test",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Integration id")),
    responses(
        (status = 200, description = "Check result", body = ConnectionCheck),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn test_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ConnectionCheck>, ApiError> {
    let Path(id) = path?;
    state
        .engine
        .test_integration(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found("Integration"))
}

/// Sync one integration now
#[utoipa::path(
    post,
    path = "/integrations/{id}/sync",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Integration id"),
        ("date_from" = Option<String>, Query, description = "First day (YYYY-MM-DD); defaults to the trailing window"),
        ("date_to" = Option<String>, Query, description = "Last day (YYYY-MM-DD); defaults to yesterday")
    ),
    responses(
        (status = 200, description = "Sync outcome; failures are reported in the body", body = SyncOutcome),
        (status = 400, description = "Invalid date range", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<SyncRangeQuery>, QueryRejection>,
) -> Result<Json<SyncOutcome>, ApiError> {
    let Path(id) = path?;
    let Query(range) = query?;
    let (date_from, date_to) = resolve_range(&state, &range)?;

    state
        .engine
        .sync_by_id(id, date_from, date_to)
        .await?
        .map(Json)
        .ok_or_else(|| not_found("Integration"))
}

/// Recent sync attempts, newest first
#[utoipa::path(
    get,
    path = "/integrations/{id}/sync-logs",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Integration id"),
        ("limit" = Option<u64>, Query, description = "Maximum entries (default 50, max 200)")
    ),
    responses(
        (status = 200, description = "Sync log entries", body = SyncLogsResponse),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_sync_logs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<SyncLogsQuery>, QueryRejection>,
) -> Result<Json<SyncLogsResponse>, ApiError> {
    let Path(id) = path?;
    let Query(params) = query?;
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if limit == 0 || limit > MAX_LOG_LIMIT {
        return Err(bad_request("limit must be between 1 and 200"));
    }

    if state.integrations.find_by_id(id).await?.is_none() {
        return Err(not_found("Integration"));
    }
    let logs = state.sync_logs.list_for_integration(id, limit).await?;

    Ok(Json(SyncLogsResponse {
        integration_id: id,
        logs: logs.into_iter().map(SyncLogInfo::from).collect(),
    }))
}
