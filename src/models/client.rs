//! Client entity model
//!
//! Clients own integrations and the aggregated client-facing metrics. Client
//! CRUD lives outside this service; the pipeline only enumerates them.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::integration::Entity")]
    Integration,
    #[sea_orm(has_many = "super::client_metric::Entity")]
    ClientMetric,
}

impl Related<super::integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Integration.def()
    }
}

impl Related<super::client_metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ClientMetric.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
