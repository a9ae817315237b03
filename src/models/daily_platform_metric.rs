//! Daily platform metric entity model
//!
//! Raw per-day figures fetched from one integration. The field set is the
//! superset across platforms; a platform leaves the fields it has no notion of
//! as `None`.

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Dimension value of the account-level daily total.
pub const ACCOUNT_DIMENSION: &str = "";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "daily_platform_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub integration_id: Uuid,
    pub platform: String,
    pub metric_date: NaiveDate,
    /// Sub-dimension key; empty for the account-level total
    pub dimension: String,
    pub impressions: Option<i64>,
    pub clicks: Option<i64>,
    pub spend: Option<f64>,
    pub conversions: Option<f64>,
    pub conversion_value: Option<f64>,
    pub reach: Option<i64>,
    pub sessions: Option<i64>,
    pub users: Option<i64>,
    pub new_users: Option<i64>,
    pub page_views: Option<i64>,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: Option<JsonValue>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::integration::Entity",
        from = "Column::IntegrationId",
        to = "super::integration::Column::Id"
    )]
    Integration,
}

impl Related<super::integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Integration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
