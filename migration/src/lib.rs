//! Database migrations for the portal sync pipeline.

pub use sea_orm_migration::prelude::*;

mod m2025_01_06_000100_create_clients;
mod m2025_01_06_000200_create_integrations;
mod m2025_01_06_000300_create_daily_platform_metrics;
mod m2025_01_06_000400_create_client_metrics;
mod m2025_01_06_000500_create_sync_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_06_000100_create_clients::Migration),
            Box::new(m2025_01_06_000200_create_integrations::Migration),
            Box::new(m2025_01_06_000300_create_daily_platform_metrics::Migration),
            Box::new(m2025_01_06_000400_create_client_metrics::Migration),
            Box::new(m2025_01_06_000500_create_sync_logs::Migration),
        ]
    }
}
