//! Trigger scheduler tests driven by explicit clock values.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use portal_sync::aggregator::MetricsAggregator;
use portal_sync::config::AppConfig;
use portal_sync::models::client_metric::{self, PeriodType};
use portal_sync::platforms::{Platform, Registry};
use portal_sync::reports::ReportPublisher;
use portal_sync::repositories::ClientMetricRepository;
use portal_sync::scheduler::{TriggerScheduler, compute_jitter_seconds};
use portal_sync::sync_engine::SyncEngine;
use rand::{SeedableRng, rngs::StdRng};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    FakeAdapter, create_client, date, seed_active_integration, setup_test_db, sync_config,
    test_config, test_crypto_key,
};

#[derive(Default)]
struct CountingPublisher {
    published: AtomicUsize,
}

#[async_trait]
impl ReportPublisher for CountingPublisher {
    async fn publish_weekly(&self, row: &client_metric::Model) -> anyhow::Result<()> {
        assert_eq!(row.period_type, "weekly");
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scheduler_config(jitter_seconds: u64) -> Arc<AppConfig> {
    let mut config = test_config();
    config.reporting_utc_offset_minutes = 540;
    config.sync = sync_config();
    config.scheduler.daily_sync_at = "03:00".to_string();
    config.scheduler.aggregation_lag_minutes = 60;
    config.scheduler.sync_window_days = 7;
    config.scheduler.start_jitter_seconds = jitter_seconds;
    Arc::new(config)
}

fn build_scheduler(
    db: &Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    publisher: Arc<CountingPublisher>,
) -> Result<TriggerScheduler> {
    let mut registry = Registry::new();
    registry.register(Platform::MetaAds, Arc::new(FakeAdapter::new()));
    let engine = SyncEngine::new(
        db.clone(),
        Arc::new(registry),
        test_crypto_key(),
        config.sync.clone(),
    );
    let aggregator = MetricsAggregator::new(db.clone(), config.reporting_offset());
    Ok(TriggerScheduler::new(
        config,
        engine,
        aggregator,
        ClientMetricRepository::new(db.clone()),
        publisher,
    )?)
}

/// UTC instant for a wall-clock time in KST.
fn kst(y: i32, m: u32, d: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    chrono::FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(y, m, d, hour, minute, second)
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn daily_sync_then_lagged_aggregation_fire_once() -> Result<()> {
    let db = setup_test_db().await?;
    let client_id = create_client(&db, "Acme").await?;
    seed_active_integration(&db, client_id, "act_1").await?;
    let publisher = Arc::new(CountingPublisher::default());
    let mut scheduler = build_scheduler(&db, scheduler_config(0), publisher.clone())?;
    let cancel = CancellationToken::new();

    // Monday 2024-05-13 in the reporting timezone.
    let early = scheduler.tick_at(kst(2024, 5, 13, 2, 59, 0), cancel.clone()).await;
    assert!(early.sync.is_none());
    assert!(early.aggregations.is_empty());

    let sync_tick = scheduler.tick_at(kst(2024, 5, 13, 3, 0, 0), cancel.clone()).await;
    let report = sync_tick.sync.expect("daily sync fired");
    assert_eq!((report.date_from, report.date_to), (date(2024, 5, 6), date(2024, 5, 12)));
    assert_eq!(report.succeeded, 1);
    assert!(sync_tick.aggregations.is_empty(), "aggregation waits for the lag");

    let within_lag = scheduler.tick_at(kst(2024, 5, 13, 3, 30, 0), cancel.clone()).await;
    assert!(within_lag.sync.is_none());
    assert!(within_lag.aggregations.is_empty());

    let aggregation_tick = scheduler.tick_at(kst(2024, 5, 13, 4, 0, 0), cancel.clone()).await;
    assert!(aggregation_tick.sync.is_none());
    assert_eq!(aggregation_tick.aggregations.len(), 1, "mid-month plans the week only");
    assert!(aggregation_tick.aggregations[0].success);
    assert_eq!(aggregation_tick.reports_published, 1);
    assert_eq!(publisher.published.load(Ordering::SeqCst), 1);

    let weekly = ClientMetricRepository::new(db.clone())
        .find_by_key(client_id, PeriodType::Weekly, date(2024, 5, 6))
        .await?
        .expect("weekly row written");
    assert_eq!(weekly.source_record_count, 7);

    let later = scheduler.tick_at(kst(2024, 5, 13, 9, 0, 0), cancel.clone()).await;
    assert!(later.sync.is_none());
    assert!(later.aggregations.is_empty());

    let next_day = scheduler.tick_at(kst(2024, 5, 14, 3, 1, 0), cancel).await;
    assert!(next_day.sync.is_some());
    Ok(())
}

#[tokio::test]
async fn weekly_report_is_handed_off_once_per_week() -> Result<()> {
    let db = setup_test_db().await?;
    let client_id = create_client(&db, "Acme").await?;
    seed_active_integration(&db, client_id, "act_1").await?;
    let publisher = Arc::new(CountingPublisher::default());
    let mut scheduler = build_scheduler(&db, scheduler_config(0), publisher.clone())?;
    let cancel = CancellationToken::new();

    // Monday, Tuesday and Wednesday all re-aggregate the week of 2024-05-06.
    let mut per_day = Vec::new();
    for day in [13, 14, 15] {
        scheduler.tick_at(kst(2024, 5, day, 3, 0, 0), cancel.clone()).await;
        let summary = scheduler.tick_at(kst(2024, 5, day, 4, 0, 0), cancel.clone()).await;
        assert_eq!(summary.aggregations.len(), 1);
        per_day.push((
            summary.aggregations[0].inserted,
            summary.aggregations[0].updated,
            summary.reports_published,
        ));
    }

    assert_eq!(per_day, vec![(1, 0, 1), (0, 1, 0), (0, 1, 0)]);
    assert_eq!(publisher.published.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn aggregation_lag_past_midnight_still_fires() -> Result<()> {
    let db = setup_test_db().await?;
    let client_id = create_client(&db, "Acme").await?;
    seed_active_integration(&db, client_id, "act_1").await?;
    let publisher = Arc::new(CountingPublisher::default());
    let mut config = (*scheduler_config(0)).clone();
    config.scheduler.daily_sync_at = "23:30".to_string();
    config.scheduler.aggregation_lag_minutes = 60;
    config.scheduler.validate()?;
    let mut scheduler = build_scheduler(&db, Arc::new(config), publisher.clone())?;
    let cancel = CancellationToken::new();

    let mut syncs = 0;
    let mut aggregation_ticks = Vec::new();
    let mut now = kst(2024, 5, 13, 0, 0, 0);
    let end = kst(2024, 5, 16, 1, 0, 0);
    while now <= end {
        let summary = scheduler.tick_at(now, cancel.clone()).await;
        if summary.sync.is_some() {
            syncs += 1;
        }
        if !summary.aggregations.is_empty() {
            aggregation_ticks.push(now);
        }
        now += chrono::Duration::minutes(5);
    }

    assert_eq!(syncs, 3);
    assert_eq!(
        aggregation_ticks,
        vec![
            kst(2024, 5, 14, 0, 30, 0),
            kst(2024, 5, 15, 0, 30, 0),
            kst(2024, 5, 16, 0, 30, 0),
        ]
    );
    // Monday's late sync covered May 6-12, so the week is closed and complete.
    let weekly = ClientMetricRepository::new(db.clone())
        .find_by_key(client_id, PeriodType::Weekly, date(2024, 5, 6))
        .await?
        .expect("weekly row written");
    assert_eq!(weekly.source_record_count, 7);
    assert_eq!(publisher.published.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn early_month_aggregation_also_closes_the_previous_month() -> Result<()> {
    let db = setup_test_db().await?;
    let publisher = Arc::new(CountingPublisher::default());
    let mut scheduler = build_scheduler(&db, scheduler_config(0), publisher)?;
    let cancel = CancellationToken::new();

    scheduler.tick_at(kst(2024, 6, 3, 3, 0, 0), cancel.clone()).await;
    let summary = scheduler.tick_at(kst(2024, 6, 3, 4, 5, 0), cancel).await;

    assert_eq!(summary.aggregations.len(), 2);
    assert!(summary.aggregations.iter().all(|r| r.success));
    assert_eq!(summary.reports_published, 0, "no clients, nothing to publish");
    Ok(())
}

#[tokio::test]
async fn start_delay_is_sampled_once_per_day() -> Result<()> {
    let db = setup_test_db().await?;
    let publisher = Arc::new(CountingPublisher::default());
    let expected = compute_jitter_seconds(120, &mut StdRng::seed_from_u64(42));
    let mut scheduler = build_scheduler(&db, scheduler_config(120), publisher)?
        .with_rng(StdRng::seed_from_u64(42));
    let cancel = CancellationToken::new();

    let first = scheduler.tick_at(kst(2024, 5, 13, 2, 0, 0), cancel.clone()).await;
    assert!(first.sync.is_none());
    assert_eq!(scheduler.state().jitter, Some((date(2024, 5, 13), expected)));

    let fire_at = kst(2024, 5, 13, 3, 0, 0) + chrono::Duration::seconds(expected as i64);
    if expected > 0 {
        let before = scheduler
            .tick_at(fire_at - chrono::Duration::seconds(1), cancel.clone())
            .await;
        assert!(before.sync.is_none());
    }
    let fired = scheduler.tick_at(fire_at, cancel).await;
    assert!(fired.sync.is_some());
    assert_eq!(scheduler.state().jitter, Some((date(2024, 5, 13), expected)));
    Ok(())
}

#[tokio::test]
async fn malformed_sync_time_is_rejected_at_construction() {
    let mut config = test_config();
    config.scheduler.daily_sync_at = "3am".to_string();
    let config = Arc::new(config);

    let db = setup_test_db().await.unwrap();
    let publisher = Arc::new(CountingPublisher::default());
    assert!(build_scheduler(&db, config, publisher).is_err());
}
