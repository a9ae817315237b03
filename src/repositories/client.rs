//! Client repository
//!
//! Clients are managed elsewhere; the pipeline needs to enumerate them and,
//! for local seeding and tests, create them.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::client::{self, Entity as Client};

#[derive(Debug, Clone)]
pub struct ClientRepository {
    db: Arc<DatabaseConnection>,
}

impl ClientRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str) -> Result<client::Model> {
        let model = client::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<client::Model>> {
        Ok(Client::find_by_id(id).one(&*self.db).await?)
    }

    /// All client ids in a stable order.
    pub async fn list_ids(&self) -> Result<Vec<Uuid>> {
        let ids = Client::find()
            .select_only()
            .column(client::Column::Id)
            .order_by_asc(client::Column::CreatedAt)
            .order_by_asc(client::Column::Id)
            .into_tuple::<Uuid>()
            .all(&*self.db)
            .await?;
        Ok(ids)
    }
}
