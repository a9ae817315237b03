//! # Trigger Scheduler
//!
//! In-process timer for the daily triggers. Each tick checks the local clock of
//! the reporting timezone and fires, at most once per local day:
//!
//! - the daily sync over the trailing window, at `DAILY_SYNC_AT` plus a
//!   random start delay;
//! - the daily aggregation of every closed bucket in the aggregation plan,
//!   `AGGREGATION_LAG_MINUTES` after the sync fired, even when the lag runs
//!   past local midnight.
//!
//! A client's weekly report is handed off once, when its row for the week is
//! first inserted. Later re-aggregations of the same week only update the row.
//!
//! Triggers never retry within a tick; the next day's run re-covers the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metrics::histogram;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::{AggregateReport, AggregateScope, MetricsAggregator};
use crate::config::{AppConfig, ConfigError, SchedulerConfig};
use crate::models::client_metric::PeriodType;
use crate::periods::{plan_aggregation, trailing_window};
use crate::reports::ReportPublisher;
use crate::repositories::ClientMetricRepository;
use crate::sync_engine::{SyncAllReport, SyncEngine};

/// Per-day bookkeeping of which triggers already fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// Local day and start delay sampled for it
    pub jitter: Option<(NaiveDate, u64)>,
    /// Local time the last daily sync fired
    pub last_sync: Option<NaiveDateTime>,
    /// Sync whose follow-up aggregation already ran
    pub last_aggregated_sync: Option<NaiveDateTime>,
}

/// Triggers due at one local instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTriggers {
    pub sync: bool,
    pub aggregate: bool,
}

/// Decides which triggers fire at `local_now`.
///
/// The sync is due once per day after `sync_at + jitter_seconds`. The
/// aggregation is due once per sync, after `aggregation_lag` has elapsed since
/// the most recent sync fired, whichever day that falls on.
pub fn due_triggers(
    state: &TriggerState,
    local_now: NaiveDateTime,
    sync_at: NaiveTime,
    jitter_seconds: u64,
    aggregation_lag: Duration,
) -> DueTriggers {
    let today = local_now.date();
    let sync_start = today.and_time(sync_at) + Duration::seconds(jitter_seconds as i64);
    let synced_today = state.last_sync.filter(|fired| fired.date() == today);

    let sync = synced_today.is_none() && local_now >= sync_start;
    let aggregate = state.last_sync.is_some_and(|fired| {
        state.last_aggregated_sync != Some(fired) && local_now >= fired + aggregation_lag
    });

    DueTriggers { sync, aggregate }
}

pub fn compute_jitter_seconds<R: Rng + ?Sized>(max_seconds: u64, rng: &mut R) -> u64 {
    if max_seconds == 0 {
        return 0;
    }
    rng.gen_range(0..=max_seconds)
}

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncAllReport>,
    pub aggregations: Vec<AggregateReport>,
    pub reports_published: usize,
}

pub struct TriggerScheduler {
    config: Arc<AppConfig>,
    engine: SyncEngine,
    aggregator: MetricsAggregator,
    client_metrics: ClientMetricRepository,
    publisher: Arc<dyn ReportPublisher>,
    sync_at: NaiveTime,
    state: TriggerState,
    rng: StdRng,
}

impl TriggerScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        engine: SyncEngine,
        aggregator: MetricsAggregator,
        client_metrics: ClientMetricRepository,
        publisher: Arc<dyn ReportPublisher>,
    ) -> Result<Self, ConfigError> {
        let sync_at = config.scheduler.daily_sync_time()?;
        Ok(Self {
            config,
            engine,
            aggregator,
            client_metrics,
            publisher,
            sync_at,
            state: TriggerState::default(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replaces the start-delay source (tests).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    fn scheduler_config(&self) -> &SchedulerConfig {
        &self.config.scheduler
    }

    /// Runs the tick loop until `shutdown` fires. An in-flight sync batch is
    /// cancelled with it.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            daily_sync_at = %self.sync_at,
            lag_minutes = self.scheduler_config().aggregation_lag_minutes,
            "starting trigger scheduler"
        );
        let tick_interval = TokioDuration::from_secs(self.scheduler_config().tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("trigger scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    let summary = self.tick_at(Utc::now(), shutdown.child_token()).await;
                    if summary.sync.is_some() || !summary.aggregations.is_empty() {
                        histogram!("portal_scheduler_tick_duration_seconds")
                            .record(tick_started.elapsed().as_secs_f64());
                    }
                }
            }
        }

        info!("trigger scheduler stopped");
    }

    /// Evaluates the triggers at `now` and runs whichever are due.
    pub async fn tick_at(&mut self, now: DateTime<Utc>, cancel: CancellationToken) -> TickSummary {
        let local_now = now.with_timezone(&self.config.reporting_offset()).naive_local();
        let today = local_now.date();

        let jitter = match self.state.jitter {
            Some((day, seconds)) if day == today => seconds,
            _ => {
                let seconds =
                    compute_jitter_seconds(self.scheduler_config().start_jitter_seconds, &mut self.rng);
                self.state.jitter = Some((today, seconds));
                seconds
            }
        };

        let lag = Duration::minutes(self.scheduler_config().aggregation_lag_minutes as i64);
        let due = due_triggers(&self.state, local_now, self.sync_at, jitter, lag);
        let aggregate_for = self.state.last_sync.filter(|_| due.aggregate);
        let mut summary = TickSummary::default();

        if due.sync {
            self.state.last_sync = Some(local_now);
            summary.sync = Some(self.run_daily_sync(today, cancel).await);
        }
        if let Some(fired) = aggregate_for {
            self.state.last_aggregated_sync = Some(fired);
            // Plan from the sync's day so a lag past midnight sees the same buckets.
            let (reports, published) = self.run_daily_aggregation(fired.date()).await;
            summary.aggregations = reports;
            summary.reports_published = published;
        }
        if !due.sync && !due.aggregate {
            debug!(%local_now, "no trigger due");
        }

        summary
    }

    async fn run_daily_sync(&self, today: NaiveDate, cancel: CancellationToken) -> SyncAllReport {
        let (from, to) = trailing_window(today, self.scheduler_config().sync_window_days);
        info!(%from, %to, "daily sync triggered");
        let report = self
            .engine
            .sync_all_active_with(from, to, self.engine.config().batch_budget(), cancel)
            .await;
        if let Some(err) = &report.error {
            error!(error = %err, "daily sync could not start");
        }
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "daily sync finished"
        );
        report
    }

    async fn run_daily_aggregation(&self, sync_day: NaiveDate) -> (Vec<AggregateReport>, usize) {
        let mut reports = Vec::new();
        let mut published = 0;

        for bucket in plan_aggregation(sync_day, self.scheduler_config().sync_window_days) {
            info!(
                period_type = %bucket.period_type,
                start = %bucket.start,
                end = %bucket.end,
                "aggregation triggered"
            );
            let report = self
                .aggregator
                .aggregate_as_of(&AggregateScope::for_bucket(bucket, None), sync_day)
                .await;
            if !report.success {
                warn!(errors = ?report.errors, "aggregation batch failed");
            }

            if bucket.period_type == PeriodType::Weekly {
                for client_id in &report.inserted_clients {
                    let row = match self
                        .client_metrics
                        .find_by_key(*client_id, bucket.period_type, bucket.start)
                        .await
                    {
                        Ok(Some(row)) => row,
                        Ok(None) => continue,
                        Err(err) => {
                            warn!(client_id = %client_id, error = %err, "failed to load weekly row");
                            continue;
                        }
                    };
                    match self.publisher.publish_weekly(&row).await {
                        Ok(()) => published += 1,
                        Err(err) => {
                            warn!(client_id = %client_id, error = %err, "weekly report hand-off failed")
                        }
                    }
                }
            }
            reports.push(report);
        }

        (reports, published)
    }
}
