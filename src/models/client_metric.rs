//! Client-facing metric entity model
//!
//! One aggregated row per (client, period type, period start). Downstream
//! report generation reads these rows by that key.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub client_id: Uuid,
    /// weekly | monthly
    pub period_type: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub sessions: i64,
    pub users: i64,
    pub page_views: i64,
    /// Derived rates; `None` when the denominator was zero
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub roas: Option<f64>,
    pub source_record_count: i32,
    /// Platforms that contributed rows, as a JSON array of identifiers
    #[sea_orm(column_type = "JsonBinary")]
    pub platforms: JsonValue,
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
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Aggregation bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            other => Err(format!("unknown period type '{other}'")),
        }
    }
}
