//! Weekly report hand-off
//!
//! Report generation and notification delivery live outside this service. The
//! scheduler hands each freshly written weekly row to a [`ReportPublisher`].

use async_trait::async_trait;
use tracing::info;

use crate::models::client_metric;

#[async_trait]
pub trait ReportPublisher: Send + Sync {
    /// Publishes one client's weekly row. Errors are logged by the caller.
    async fn publish_weekly(&self, row: &client_metric::Model) -> anyhow::Result<()>;
}

/// Publisher that only logs the hand-off.
#[derive(Debug, Clone, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl ReportPublisher for LoggingPublisher {
    async fn publish_weekly(&self, row: &client_metric::Model) -> anyhow::Result<()> {
        info!(
            client_id = %row.client_id,
            period_start = %row.period_start,
            period_end = %row.period_end,
            impressions = row.impressions,
            clicks = row.clicks,
            spend = row.spend,
            "weekly report ready"
        );
        Ok(())
    }
}
