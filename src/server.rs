//! # Server Configuration
//!
//! Router, shared state and the `serve` entry point that runs the HTTP API and
//! the trigger scheduler side by side.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::aggregator::MetricsAggregator;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::platforms::Registry;
use crate::reports::LoggingPublisher;
use crate::repositories::{ClientMetricRepository, IntegrationRepository, SyncLogRepository};
use crate::scheduler::TriggerScheduler;
use crate::sync_engine::SyncEngine;
use crate::telemetry::{TraceContext, with_trace_context};

const TRACE_HEADER: &str = "x-trace-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub engine: SyncEngine,
    pub aggregator: MetricsAggregator,
    pub integrations: IntegrationRepository,
    pub sync_logs: SyncLogRepository,
    pub client_metrics: ClientMetricRepository,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        registry: Arc<Registry>,
    ) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("PORTAL_CRYPTO_KEY is required")?;
        let crypto_key = CryptoKey::new(key_bytes)?;

        Ok(Self {
            engine: SyncEngine::new(
                db.clone(),
                registry,
                crypto_key.clone(),
                config.sync.clone(),
            ),
            aggregator: MetricsAggregator::new(db.clone(), config.reporting_offset()),
            integrations: IntegrationRepository::new(db.clone(), crypto_key),
            sync_logs: SyncLogRepository::new(db.clone()),
            client_metrics: ClientMetricRepository::new(db.clone()),
            config,
            db,
        })
    }
}

/// Tags every request with a trace id, taken from `x-trace-id` when present.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/integrations", post(handlers::integrations::create_integration))
        .route(
            "/integrations/{id}",
            axum::routing::delete(handlers::integrations::delete_integration),
        )
        .route(
            "/integrations/{id}/test",
            post(handlers::integrations::test_integration),
        )
        .route(
            "/integrations/{id}/sync",
            post(handlers::integrations::sync_integration),
        )
        .route(
            "/integrations/{id}/sync-logs",
            get(handlers::integrations::list_sync_logs),
        )
        .route("/sync", post(handlers::sync::sync_all))
        .route("/aggregate", post(handlers::aggregate::aggregate))
        .route(
            "/clients/{client_id}/metrics/{period_type}/{period_start}",
            get(handlers::metrics::get_client_metric),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API and, when enabled, the trigger scheduler until Ctrl-C.
pub async fn run_server(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    let state = AppState::new(Arc::clone(&config), db, registry)?;
    let shutdown = CancellationToken::new();

    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = TriggerScheduler::new(
            Arc::clone(&config),
            state.engine.clone(),
            state.aggregator.clone(),
            state.client_metrics.clone(),
            Arc::new(LoggingPublisher),
        )?;
        Some(tokio::spawn(scheduler.run(shutdown.child_token())))
    } else {
        tracing::info!("trigger scheduler disabled");
        None
    };

    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address '{}'", config.api_bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "server listening");

    let app = create_app(state);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler_handle
        && let Err(err) = handle.await
    {
        tracing::error!(error = %err, "scheduler task failed");
    }
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::integrations::create_integration,
        crate::handlers::integrations::delete_integration,
        crate::handlers::integrations::test_integration,
        crate::handlers::integrations::sync_integration,
        crate::handlers::integrations::list_sync_logs,
        crate::handlers::sync::sync_all,
        crate::handlers::aggregate::aggregate,
        crate::handlers::metrics::get_client_metric,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::integrations::CreateIntegrationRequest,
            crate::handlers::integrations::IntegrationInfo,
            crate::handlers::integrations::SyncLogInfo,
            crate::handlers::integrations::SyncLogsResponse,
            crate::handlers::metrics::ClientMetricInfo,
            crate::sync_engine::SyncOutcome,
            crate::sync_engine::SyncAllReport,
            crate::sync_engine::SyncFailure,
            crate::sync_engine::SyncErrorKind,
            crate::sync_engine::ConnectionCheck,
            crate::aggregator::AggregateScope,
            crate::aggregator::AggregateReport,
            crate::aggregator::AggregateError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Portal Sync API",
        description = "Administrative triggers for integration sync and metrics aggregation",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
