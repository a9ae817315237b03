//! # Data Models
//!
//! SeaORM entities for the sync and aggregation pipeline.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod client;
pub mod client_metric;
pub mod daily_platform_metric;
pub mod integration;
pub mod sync_log;

pub use client::Entity as Client;
pub use client_metric::Entity as ClientMetric;
pub use daily_platform_metric::Entity as DailyPlatformMetric;
pub use integration::Entity as Integration;
pub use sync_log::Entity as SyncLog;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "portal-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
