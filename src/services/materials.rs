use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    material::{self, Entity as Materials},
    material_alternative::{self, canonical_pair, Entity as MaterialAlternatives},
    material_category::{self, Entity as MaterialCategories},
};
use crate::errors::ServiceError;

/// Loads a material or fails with `NotFound`.
pub async fn find_material<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
) -> Result<material::Model, ServiceError> {
    Materials::find_by_id(material_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("material {}", material_id)))
}

/// Ids of all alternatives of a material. The symmetric relation is stored
/// once per pair, so both edge directions are checked.
pub async fn alternative_ids<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
) -> Result<Vec<i64>, ServiceError> {
    let edges = MaterialAlternatives::find()
        .filter(
            Condition::any()
                .add(material_alternative::Column::MaterialAId.eq(material_id))
                .add(material_alternative::Column::MaterialBId.eq(material_id)),
        )
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(edges
        .iter()
        .filter_map(|edge| edge.other(material_id))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialInput {
    pub name: String,
    #[serde(default)]
    pub manufacturer_name: String,
    #[serde(default)]
    pub order_number: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Clone)]
pub struct MaterialService {
    db_pool: Arc<DbPool>,
}

impl MaterialService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input))]
    pub async fn create_material(
        &self,
        input: MaterialInput,
    ) -> Result<material::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        self.validate_input(db, &input).await?;

        let material = material::ActiveModel {
            name: Set(input.name.trim().to_string()),
            manufacturer_name: Set(input.manufacturer_name),
            order_number: Set(input.order_number),
            category_id: Set(input.category_id),
            deprecated: Set(input.deprecated),
            ..Default::default()
        };

        material.insert(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, input))]
    pub async fn update_material(
        &self,
        material_id: i64,
        input: MaterialInput,
    ) -> Result<material::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let material = find_material(db, material_id).await?;
        self.validate_input(db, &input).await?;

        let mut active: material::ActiveModel = material.into();
        active.name = Set(input.name.trim().to_string());
        active.manufacturer_name = Set(input.manufacturer_name);
        active.order_number = Set(input.order_number);
        active.category_id = Set(input.category_id);
        active.deprecated = Set(input.deprecated);
        active.update(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_material(&self, material_id: i64) -> Result<material::Model, ServiceError> {
        find_material(self.db_pool.as_ref(), material_id).await
    }

    /// All materials, sorted the way the stock overview groups them:
    /// category sort order first, then name.
    #[instrument(skip(self))]
    pub async fn list_materials(&self) -> Result<Vec<material::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        let categories = MaterialCategories::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let sort_order_of = |category_id: Option<i64>| {
            category_id
                .and_then(|id| categories.iter().find(|c| c.id == id))
                .map(|c| c.sort_order)
                .unwrap_or(i32::MAX)
        };

        let mut materials = Materials::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        materials.sort_by_key(|m| (sort_order_of(m.category_id), m.name.to_lowercase()));

        Ok(materials)
    }

    /// Removes a material together with its movements, document lines and
    /// alternative edges.
    #[instrument(skip(self))]
    pub async fn delete_material(&self, material_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let material = find_material(db, material_id).await?;
        material.delete(db).await.map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// Links two materials as mutually substitutable. The relation is
    /// symmetric and idempotent; a material cannot be its own alternative.
    #[instrument(skip(self))]
    pub async fn add_alternative(
        &self,
        material_id: i64,
        alternative_id: i64,
    ) -> Result<(), ServiceError> {
        if material_id == alternative_id {
            return Err(ServiceError::validation(
                "a material cannot be its own alternative",
            ));
        }

        let db = self.db_pool.as_ref();
        find_material(db, material_id).await?;
        find_material(db, alternative_id).await?;

        let (low, high) = canonical_pair(material_id, alternative_id);
        let existing = MaterialAlternatives::find()
            .filter(material_alternative::Column::MaterialAId.eq(low))
            .filter(material_alternative::Column::MaterialBId.eq(high))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing.is_some() {
            return Ok(());
        }

        let edge = material_alternative::ActiveModel {
            material_a_id: Set(low),
            material_b_id: Set(high),
            ..Default::default()
        };
        edge.insert(db).await.map_err(ServiceError::db_error)?;

        Ok(())
    }

    /// Removes the alternative link between two materials, if present.
    #[instrument(skip(self))]
    pub async fn remove_alternative(
        &self,
        material_id: i64,
        alternative_id: i64,
    ) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        find_material(db, material_id).await?;
        find_material(db, alternative_id).await?;

        let (low, high) = canonical_pair(material_id, alternative_id);
        MaterialAlternatives::delete_many()
            .filter(material_alternative::Column::MaterialAId.eq(low))
            .filter(material_alternative::Column::MaterialBId.eq(high))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(())
    }

    /// The materials substitutable for the given one.
    #[instrument(skip(self))]
    pub async fn alternatives_of(
        &self,
        material_id: i64,
    ) -> Result<Vec<material::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        find_material(db, material_id).await?;

        let ids = alternative_ids(db, material_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        Materials::find()
            .filter(material::Column::Id.is_in(ids))
            .order_by_asc(material::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        name: &str,
        sort_order: i32,
    ) -> Result<material_category::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::validation("category name cannot be empty"));
        }

        let category = material_category::ActiveModel {
            name: Set(name.trim().to_string()),
            sort_order: Set(sort_order),
            ..Default::default()
        };

        category
            .insert(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn validate_input<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: &MaterialInput,
    ) -> Result<(), ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::validation("material name cannot be empty"));
        }

        if let Some(category_id) = input.category_id {
            MaterialCategories::find_by_id(category_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found(format!("category {}", category_id)))?;
        }

        Ok(())
    }
}
