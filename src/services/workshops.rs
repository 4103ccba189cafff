use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryOrder, Set};
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::workshop::{self, Entity as Workshops};
use crate::errors::ServiceError;

/// Loads a workshop or fails with `NotFound`.
pub async fn find_workshop<C: ConnectionTrait>(
    conn: &C,
    workshop_id: i64,
) -> Result<workshop::Model, ServiceError> {
    Workshops::find_by_id(workshop_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("workshop {}", workshop_id)))
}

#[derive(Clone)]
pub struct WorkshopService {
    db_pool: Arc<DbPool>,
}

impl WorkshopService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn create_workshop(&self, name: &str) -> Result<workshop::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::validation("workshop name cannot be empty"));
        }

        let workshop = workshop::ActiveModel {
            name: Set(name.trim().to_string()),
            ..Default::default()
        };

        workshop
            .insert(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn rename_workshop(
        &self,
        workshop_id: i64,
        name: &str,
    ) -> Result<workshop::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::validation("workshop name cannot be empty"));
        }

        let db = self.db_pool.as_ref();
        let workshop = find_workshop(db, workshop_id).await?;

        let mut active: workshop::ActiveModel = workshop.into();
        active.name = Set(name.trim().to_string());
        active.update(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_workshop(&self, workshop_id: i64) -> Result<workshop::Model, ServiceError> {
        find_workshop(self.db_pool.as_ref(), workshop_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_workshops(&self) -> Result<Vec<workshop::Model>, ServiceError> {
        Workshops::find()
            .order_by_asc(workshop::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Removes a workshop. Its movements, deliveries and transfers cascade
    /// away with it; this is the destructive teardown of a location.
    #[instrument(skip(self))]
    pub async fn delete_workshop(&self, workshop_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let workshop = find_workshop(db, workshop_id).await?;
        workshop.delete(db).await.map_err(ServiceError::db_error)?;
        Ok(())
    }
}
