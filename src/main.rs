//! # Portal Sync Entry Point
//!
//! `serve` runs the HTTP API with the trigger scheduler; the other commands run
//! one trigger and print its structured result as JSON.

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use portal_sync::{
    aggregator::{AggregateScope, MetricsAggregator},
    config::{AppConfig, ConfigLoader},
    crypto::CryptoKey,
    db,
    migration::{Migrator, MigratorTrait},
    models::client_metric::PeriodType,
    periods::trailing_window,
    platforms::Registry,
    server::run_server,
    sync_engine::SyncEngine,
    telemetry,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "portal-sync", version, about = "Integration sync and metrics aggregation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the operator API and run the daily triggers
    Serve,
    /// Sync every active integration
    SyncAll(RangeArgs),
    /// Sync one integration
    Sync {
        integration_id: Uuid,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Aggregate one closed bucket
    Aggregate {
        #[arg(long, value_enum)]
        period: PeriodArg,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Restrict to one client
        #[arg(long)]
        client: Option<Uuid>,
    },
    /// Apply pending database migrations
    Migrate,
}

#[derive(Debug, clap::Args)]
struct RangeArgs {
    /// First day (YYYY-MM-DD); defaults to the trailing sync window
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day (YYYY-MM-DD); defaults to yesterday
    #[arg(long)]
    to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PeriodArg {
    Weekly,
    Monthly,
}

impl From<PeriodArg> for PeriodType {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Weekly => PeriodType::Weekly,
            PeriodArg::Monthly => PeriodType::Monthly,
        }
    }
}

impl RangeArgs {
    fn resolve(&self, config: &AppConfig) -> anyhow::Result<(NaiveDate, NaiveDate)> {
        let today = config.local_date(Utc::now());
        let (from, to) = trailing_window(today, config.scheduler.sync_window_days);
        let (from, to) = (self.from.unwrap_or(from), self.to.unwrap_or(to));
        anyhow::ensure!(from <= to, "--from {from} is after --to {to}");
        Ok((from, to))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_engine(config: &AppConfig, db: Arc<sea_orm::DatabaseConnection>) -> anyhow::Result<SyncEngine> {
    let registry = Registry::from_settings(&config.platforms, config.sync.fetch_timeout())?;
    registry.validate()?;
    let key = config.crypto_key.clone().context("PORTAL_CRYPTO_KEY is required")?;
    Ok(SyncEngine::new(
        db,
        Arc::new(registry),
        CryptoKey::new(key)?,
        config.sync.clone(),
    ))
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "effective configuration");
    }

    let db = Arc::new(db::init_pool(&config).await?);

    match cli.command {
        Command::Migrate => {
            Migrator::up(db.as_ref(), None).await.context("applying migrations")?;
            tracing::info!("migrations applied");
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let registry = Registry::from_settings(&config.platforms, config.sync.fetch_timeout())?;
            registry.validate()?;
            run_server(Arc::new(config), db, Arc::new(registry)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::SyncAll(range) => {
            let (from, to) = range.resolve(&config)?;
            let report = build_engine(&config, db)?.sync_all_active(from, to).await;
            print_json(&report)?;
            Ok(if report.error.is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Sync {
            integration_id,
            range,
        } => {
            let (from, to) = range.resolve(&config)?;
            let outcome = build_engine(&config, db)?
                .sync_by_id(integration_id, from, to)
                .await?
                .with_context(|| format!("integration {integration_id} not found"))?;
            print_json(&outcome)?;
            Ok(if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Aggregate {
            period,
            from,
            to,
            client,
        } => {
            let aggregator = MetricsAggregator::new(db, config.reporting_offset());
            let report = aggregator
                .aggregate(&AggregateScope {
                    client_id: client,
                    period_type: period.into(),
                    date_from: from,
                    date_to: to,
                })
                .await;
            print_json(&report)?;
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
