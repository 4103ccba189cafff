use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    bom_line::{self, Entity as BomLines},
    material,
    product::{self, Entity as Products},
    product_stock::{self, Entity as ProductStocks},
};
use crate::errors::ServiceError;
use crate::services::materials;

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    pub article_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BomLineInput {
    pub material_id: i64,
    pub quantity_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BomLineView {
    pub id: i64,
    pub material_id: i64,
    pub material_name: String,
    pub quantity_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub id: i64,
    pub name: String,
    pub article_number: String,
    pub deprecated: bool,
    pub bom: Vec<BomLineView>,
}

/// A product consuming a material, from the reverse-dependency query.
#[derive(Debug, Clone, Serialize)]
pub struct MaterialUsage {
    pub product_id: i64,
    pub product_name: String,
    pub quantity_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeprecationSummary {
    pub product_id: i64,
    pub deprecated_material_ids: Vec<i64>,
}

/// Products and their bills of material.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(&self, input: ProductInput) -> Result<product::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        validate_product_input(db, &input, None).await?;

        let product = product::ActiveModel {
            name: Set(input.name.trim().to_string()),
            article_number: Set(input.article_number.trim().to_string()),
            deprecated: Set(false),
            ..Default::default()
        };

        product.insert(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: i64,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;
        validate_product_input(db, &input, Some(product_id)).await?;

        let mut active: product::ActiveModel = product.into();
        active.name = Set(input.name.trim().to_string());
        active.article_number = Set(input.article_number.trim().to_string());
        active.update(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i64) -> Result<ProductDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;
        self.build_detail(product).await
    }

    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<ProductDetail>, ServiceError> {
        let db = self.db_pool.as_ref();
        let products = Products::find()
            .order_by_asc(product::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut details = Vec::with_capacity(products.len());
        for product in products {
            details.push(self.build_detail(product).await?);
        }
        Ok(details)
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        BomLines::delete_many()
            .filter(bom_line::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        ProductStocks::delete_many()
            .filter(product_stock::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        product.delete(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok(())
    }

    /// Replaces the product's bill of materials wholesale.
    #[instrument(skip(self, lines))]
    pub async fn set_bom_lines(
        &self,
        product_id: i64,
        lines: Vec<BomLineInput>,
    ) -> Result<ProductDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;

        let mut seen = HashSet::new();
        for line in &lines {
            materials::find_material(db, line.material_id).await?;
            if line.quantity_per_unit <= Decimal::ZERO {
                return Err(ServiceError::validation(format!(
                    "quantity per unit for material {} must be positive",
                    line.material_id
                )));
            }
            if !seen.insert(line.material_id) {
                return Err(ServiceError::validation(format!(
                    "material {} appears more than once in the bill of materials",
                    line.material_id
                )));
            }
        }

        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        BomLines::delete_many()
            .filter(bom_line::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        for line in &lines {
            bom_line::ActiveModel {
                product_id: Set(product_id),
                material_id: Set(line.material_id),
                quantity_per_unit: Set(line.quantity_per_unit),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.build_detail(product).await
    }

    /// Which products consume a material, with their per-unit quantities.
    #[instrument(skip(self))]
    pub async fn material_usage(
        &self,
        material_id: i64,
    ) -> Result<Vec<MaterialUsage>, ServiceError> {
        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;

        let lines = BomLines::find()
            .filter(bom_line::Column::MaterialId.eq(material_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut usages = Vec::with_capacity(lines.len());
        for line in lines {
            let product = find_product(db, line.product_id).await?;
            usages.push(MaterialUsage {
                product_id: product.id,
                product_name: product.name,
                quantity_per_unit: line.quantity_per_unit,
            });
        }
        usages.sort_by_key(|u| u.product_id);
        Ok(usages)
    }

    /// Deprecates a product together with every BOM material no other
    /// non-deprecated product still consumes.
    #[instrument(skip(self))]
    pub async fn deprecate_product_with_materials(
        &self,
        product_id: i64,
    ) -> Result<DeprecationSummary, ServiceError> {
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let mut active: product::ActiveModel = product.into();
        active.deprecated = Set(true);
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        let lines = BomLines::find()
            .filter(bom_line::Column::ProductId.eq(product_id))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut deprecated_material_ids = Vec::new();
        for line in lines {
            if self
                .still_in_use(&txn, line.material_id, product_id)
                .await?
            {
                continue;
            }

            let material = materials::find_material(&txn, line.material_id).await?;
            if !material.deprecated {
                let mut active: material::ActiveModel = material.into();
                active.deprecated = Set(true);
                active.update(&txn).await.map_err(ServiceError::db_error)?;
            }
            deprecated_material_ids.push(line.material_id);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        deprecated_material_ids.sort_unstable();
        Ok(DeprecationSummary {
            product_id,
            deprecated_material_ids,
        })
    }

    /// True when another non-deprecated product still consumes the material.
    async fn still_in_use<C: ConnectionTrait>(
        &self,
        conn: &C,
        material_id: i64,
        excluding_product_id: i64,
    ) -> Result<bool, ServiceError> {
        let other_lines = BomLines::find()
            .filter(bom_line::Column::MaterialId.eq(material_id))
            .filter(bom_line::Column::ProductId.ne(excluding_product_id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        for line in other_lines {
            let product = find_product(conn, line.product_id).await?;
            if !product.deprecated {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn build_detail(&self, product: product::Model) -> Result<ProductDetail, ServiceError> {
        let db = self.db_pool.as_ref();

        let lines = BomLines::find()
            .filter(bom_line::Column::ProductId.eq(product.id))
            .order_by_asc(bom_line::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut bom = Vec::with_capacity(lines.len());
        for line in lines {
            let material = materials::find_material(db, line.material_id).await?;
            bom.push(BomLineView {
                id: line.id,
                material_id: line.material_id,
                material_name: material.name,
                quantity_per_unit: line.quantity_per_unit,
            });
        }

        Ok(ProductDetail {
            id: product.id,
            name: product.name,
            article_number: product.article_number,
            deprecated: product.deprecated,
            bom,
        })
    }
}

/// Loads a product or fails with `NotFound`.
pub async fn find_product<C: ConnectionTrait>(
    conn: &C,
    product_id: i64,
) -> Result<product::Model, ServiceError> {
    Products::find_by_id(product_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("product {}", product_id)))
}

async fn validate_product_input<C: ConnectionTrait>(
    conn: &C,
    input: &ProductInput,
    updating: Option<i64>,
) -> Result<(), ServiceError> {
    if input.name.trim().is_empty() {
        return Err(ServiceError::validation("product name cannot be empty"));
    }
    if input.article_number.trim().is_empty() {
        return Err(ServiceError::validation("article number cannot be empty"));
    }

    let mut query = Products::find()
        .filter(product::Column::ArticleNumber.eq(input.article_number.trim()));
    if let Some(product_id) = updating {
        query = query.filter(product::Column::Id.ne(product_id));
    }
    if query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .is_some()
    {
        return Err(ServiceError::Conflict(format!(
            "article number '{}' is already in use",
            input.article_number.trim()
        )));
    }

    Ok(())
}
