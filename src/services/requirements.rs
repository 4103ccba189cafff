use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    bom_line::{self, Entity as BomLines},
    product::{self, Entity as Products},
};
use crate::errors::ServiceError;
use crate::services::{ledger, materials, orders, products, workshops};

/// One requested (product, quantity) pair of a manufacturing run.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductQuantity {
    pub product_id: i64,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialRequirement {
    pub material_id: i64,
    pub material_name: String,
    /// Total needed across all requested products.
    pub required: Decimal,
    /// Stock over the material's alternatives closure in the workshop.
    pub available: Decimal,
    /// Open purchase-order quantity, unscoped by workshop.
    pub on_order: Decimal,
    /// `max(0, required - (available + on_order))`.
    pub missing: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductProducibility {
    pub product_id: i64,
    pub product_name: String,
    pub producible_units: i64,
}

/// Derived planning queries over the BOM graph, the ledger, and outstanding
/// purchase orders. Read-only; never writes.
#[derive(Clone)]
pub struct RequirementsService {
    db_pool: Arc<DbPool>,
}

impl RequirementsService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Requirements of a single manufacturing run.
    #[instrument(skip(self))]
    pub async fn material_requirements(
        &self,
        product_id: i64,
        desired_quantity: Decimal,
        workshop_id: i64,
    ) -> Result<Vec<MaterialRequirement>, ServiceError> {
        self.aggregated_material_requirements(
            &[ProductQuantity {
                product_id,
                quantity: desired_quantity,
            }],
            workshop_id,
        )
        .await
    }

    /// Requirements aggregated over several products: `required` is summed
    /// per material across all requested products, then compared against
    /// availability once.
    #[instrument(skip(self, requests))]
    pub async fn aggregated_material_requirements(
        &self,
        requests: &[ProductQuantity],
        workshop_id: i64,
    ) -> Result<Vec<MaterialRequirement>, ServiceError> {
        let db = self.db_pool.as_ref();
        workshops::find_workshop(db, workshop_id).await?;

        let mut required: BTreeMap<i64, Decimal> = BTreeMap::new();
        for request in requests {
            if request.quantity <= Decimal::ZERO {
                return Err(ServiceError::validation(format!(
                    "requested quantity for product {} must be positive",
                    request.product_id
                )));
            }
            products::find_product(db, request.product_id).await?;

            let lines = BomLines::find()
                .filter(bom_line::Column::ProductId.eq(request.product_id))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;
            for line in lines {
                *required.entry(line.material_id).or_default() +=
                    line.quantity_per_unit * request.quantity;
            }
        }

        let material_ids: Vec<i64> = required.keys().copied().collect();
        let on_order = orders::outstanding_quantities(db, &material_ids).await?;

        let mut requirements = Vec::with_capacity(required.len());
        for (material_id, required_quantity) in required {
            let material = materials::find_material(db, material_id).await?;
            let available = ledger::available_stock(db, material_id, workshop_id).await?;
            let on_order_quantity = on_order.get(&material_id).copied().unwrap_or_default();
            let missing =
                (required_quantity - (available + on_order_quantity)).max(Decimal::ZERO);

            requirements.push(MaterialRequirement {
                material_id,
                material_name: material.name,
                required: required_quantity,
                available,
                on_order: on_order_quantity,
                missing,
            });
        }

        Ok(requirements)
    }

    /// Whole units of the product manufacturable from the workshop's stock:
    /// the scarcest BOM line bounds the count. A line with a non-positive
    /// per-unit quantity fails closed and bounds it to zero.
    #[instrument(skip(self))]
    pub async fn producible_units(
        &self,
        product_id: i64,
        workshop_id: i64,
    ) -> Result<i64, ServiceError> {
        let db = self.db_pool.as_ref();
        products::find_product(db, product_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let lines = BomLines::find()
            .filter(bom_line::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if lines.is_empty() {
            return Ok(0);
        }

        let mut limit = i64::MAX;
        for line in lines {
            let units = if line.quantity_per_unit <= Decimal::ZERO {
                0
            } else {
                let available = ledger::available_stock(db, line.material_id, workshop_id).await?;
                (available / line.quantity_per_unit)
                    .floor()
                    .to_i64()
                    .unwrap_or(0)
                    .max(0)
            };
            limit = limit.min(units);
        }

        Ok(limit)
    }

    /// Producible units for every product in one workshop.
    #[instrument(skip(self))]
    pub async fn producible_overview(
        &self,
        workshop_id: i64,
    ) -> Result<Vec<ProductProducibility>, ServiceError> {
        let db = self.db_pool.as_ref();
        workshops::find_workshop(db, workshop_id).await?;

        let all_products = Products::find()
            .order_by_asc(product::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut overview = Vec::with_capacity(all_products.len());
        for product in all_products {
            let producible_units = self.producible_units(product.id, workshop_id).await?;
            overview.push(ProductProducibility {
                product_id: product.id,
                product_name: product.name,
                producible_units,
            });
        }

        Ok(overview)
    }
}
