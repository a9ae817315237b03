//! Database connection pool.
//!
//! Postgres in deployment, SQLite for tests and local runs.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Opens the connection pool, retrying with exponential backoff.
///
/// ```no_run
/// use portal_sync::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     portal_sync::db::health_check(&db).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("connected to database (attempt {attempt})");
                return Ok(conn);
            }
            Err(e) if attempt >= MAX_CONNECT_ATTEMPTS => {
                log::error!("failed to connect to database after {attempt} attempts: {e}");
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
            Err(e) => {
                log::warn!(
                    "database connection attempt {attempt} failed: {e}, retrying in {retry_delay:?}"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Runs `SELECT 1`.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("database health check failed")?;
    Ok(())
}
