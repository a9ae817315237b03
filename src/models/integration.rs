//! Integration entity model
//!
//! An integration is a client's configured connection to one external
//! advertising or analytics platform.

use std::{fmt, str::FromStr};

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning client
    pub client_id: Uuid,

    /// Platform identifier (`meta_ads`, `google_ads`, ...). Kept as text and
    /// parsed at dispatch so unknown values fail one item, not the listing.
    pub platform: String,

    pub display_name: String,

    /// Sealed `PlatformCredentials` bundle, see [`crate::crypto`]
    pub credentials_ciphertext: Vec<u8>,

    /// Serialized `PlatformConfig` bundle
    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    /// inactive | active | error
    pub status: String,

    /// Failed sync attempts since the last success
    pub consecutive_failures: i32,

    pub last_error: Option<String>,

    pub last_sync_at: Option<DateTimeWithTimeZone>,

    /// Admin who created the integration
    pub created_by: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id"
    )]
    Client,
    #[sea_orm(has_many = "super::daily_platform_metric::Entity")]
    DailyPlatformMetric,
    #[sea_orm(has_many = "super::sync_log::Entity")]
    SyncLog,
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl Related<super::daily_platform_metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DailyPlatformMetric.def()
    }
}

impl Related<super::sync_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Associated data binding the sealed credentials to this row.
    pub fn credentials_aad(&self) -> String {
        credentials_aad(self.client_id, &self.platform, self.id)
    }

    pub fn status(&self) -> Option<IntegrationStatus> {
        self.status.parse().ok()
    }
}

/// Associated data used when sealing an integration's credentials.
pub fn credentials_aad(client_id: Uuid, platform: &str, integration_id: Uuid) -> String {
    format!("{client_id}|{platform}|{integration_id}")
}

/// Lifecycle state of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Inactive,
    Active,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Inactive => "inactive",
            IntegrationStatus::Active => "active",
            IntegrationStatus::Error => "error",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(IntegrationStatus::Inactive),
            "active" => Ok(IntegrationStatus::Active),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(format!("unknown integration status '{other}'")),
        }
    }
}
