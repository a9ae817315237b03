//! Telemetry: global subscriber setup, request trace context and metric names.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Counter labelled by `platform` and `outcome`.
pub const SYNC_RUNS_TOTAL: &str = "portal_sync_runs_total";
/// Counter of daily rows written, labelled by `platform`.
pub const SYNC_RECORDS_TOTAL: &str = "portal_sync_records_total";
/// Histogram of per-integration sync duration, labelled by `platform`.
pub const SYNC_DURATION_SECONDS: &str = "portal_sync_duration_seconds";
/// Counter labelled by `period_type` and `outcome`.
pub const AGGREGATIONS_TOTAL: &str = "portal_aggregations_total";

/// Request correlation id carried through task-local storage.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber once and bridges `log` records into tracing.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Another component may already have installed the bridge.
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("warning: failed to install log tracer bridge: {err}");
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("warning: failed to set global tracing subscriber: {err}");
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(SYNC_RUNS_TOTAL, "Integration sync attempts by platform and outcome");
    metrics::describe_counter!(SYNC_RECORDS_TOTAL, "Daily metric rows upserted by sync runs");
    metrics::describe_histogram!(
        SYNC_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall-clock duration of one integration sync"
    );
    metrics::describe_counter!(AGGREGATIONS_TOTAL, "Client aggregations by period type and outcome");
}

/// Runs `future` with `context` available to [`current_trace_id`].
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Trace id of the request being served by the current task, if any.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}
