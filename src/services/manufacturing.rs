use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    bom_line::{self, Entity as BomLines},
    product_stock::{self, Entity as ProductStocks},
    stock_movement::ChangeKind,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_validation::{self, StockGuard};
use crate::services::{ledger, materials, products, workshops};

#[derive(Debug, Clone, Serialize)]
pub struct MaterialConsumption {
    pub material_id: i64,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManufactureReport {
    pub product_id: i64,
    pub workshop_id: i64,
    pub quantity: Decimal,
    pub consumed: Vec<MaterialConsumption>,
    /// Finished-goods balance of the workshop after the run.
    pub product_stock: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductStockLine {
    pub product_id: i64,
    pub name: String,
    pub article_number: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkshopProductStock {
    pub workshop_id: i64,
    pub workshop_name: String,
    pub quantity: Decimal,
}

/// Cross-workshop finished-goods figure, the read-only view external
/// integrations consume.
#[derive(Debug, Clone, Serialize)]
pub struct ProductStockSummary {
    pub product_id: i64,
    pub total: Decimal,
    pub per_workshop: Vec<WorkshopProductStock>,
}

/// Manufacturing runs: consume BOM materials from the ledger, credit the
/// finished-goods counter.
#[derive(Clone)]
pub struct ManufacturingService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    stock_guard: Arc<StockGuard>,
}

impl ManufacturingService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        stock_guard: Arc<StockGuard>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            stock_guard,
        }
    }

    /// Manufactures `quantity` units: one consumption movement per BOM line,
    /// plus the finished-goods credit, in one transaction.
    ///
    /// Every line is validated against current stock before anything is
    /// written; a single uncovered line rejects the whole run.
    #[instrument(skip(self))]
    pub async fn manufacture(
        &self,
        product_id: i64,
        workshop_id: i64,
        quantity: Decimal,
    ) -> Result<ManufactureReport, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::validation(
                "manufactured quantity must be positive",
            ));
        }

        let db = self.db_pool.as_ref();
        let product = products::find_product(db, product_id).await?;
        let workshop = workshops::find_workshop(db, workshop_id).await?;

        let lines = BomLines::find()
            .filter(bom_line::Column::ProductId.eq(product_id))
            .order_by_asc(bom_line::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if lines.is_empty() {
            return Err(ServiceError::validation(format!(
                "product '{}' has no bill of materials",
                product.name
            )));
        }

        let lock_keys: Vec<(i64, i64)> = lines
            .iter()
            .map(|line| (line.material_id, workshop_id))
            .collect();
        let _guards = self.stock_guard.lock_pairs(lock_keys).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let mut consumed = Vec::with_capacity(lines.len());
        for line in &lines {
            let required = line.quantity_per_unit * quantity;
            let validation =
                stock_validation::validate_movement(&txn, line.material_id, workshop_id, -required)
                    .await?;
            if !validation.valid {
                let material = materials::find_material(&txn, line.material_id).await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "material '{}' in workshop '{}': {}",
                    material.name, workshop.name, validation.message
                )));
            }
            consumed.push(MaterialConsumption {
                material_id: line.material_id,
                quantity: required,
            });
        }

        let note = format!("Manufactured {}x {}", quantity, product.name);
        for consumption in &consumed {
            ledger::record_movement(
                &txn,
                workshop_id,
                consumption.material_id,
                ChangeKind::Consumption,
                consumption.quantity,
                note.clone(),
                None,
            )
            .await?;
        }

        let product_stock = credit_product_stock(&txn, workshop_id, product_id, quantity).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::ProductManufactured {
                product_id,
                workshop_id,
                quantity,
            })
            .await;

        Ok(ManufactureReport {
            product_id,
            workshop_id,
            quantity,
            consumed,
            product_stock,
        })
    }

    /// Finished-goods balance for one (product, workshop); zero when the
    /// counter has never been touched.
    #[instrument(skip(self))]
    pub async fn product_stock(
        &self,
        product_id: i64,
        workshop_id: i64,
    ) -> Result<Decimal, ServiceError> {
        let db = self.db_pool.as_ref();
        products::find_product(db, product_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let stock = ProductStocks::find()
            .filter(product_stock::Column::ProductId.eq(product_id))
            .filter(product_stock::Column::WorkshopId.eq(workshop_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(stock.map(|s| s.quantity).unwrap_or_default())
    }

    /// Finished goods currently held in one workshop.
    #[instrument(skip(self))]
    pub async fn workshop_product_overview(
        &self,
        workshop_id: i64,
    ) -> Result<Vec<ProductStockLine>, ServiceError> {
        let db = self.db_pool.as_ref();
        workshops::find_workshop(db, workshop_id).await?;

        let stocks = ProductStocks::find()
            .filter(product_stock::Column::WorkshopId.eq(workshop_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut lines = Vec::with_capacity(stocks.len());
        for stock in stocks {
            let product = products::find_product(db, stock.product_id).await?;
            lines.push(ProductStockLine {
                product_id: product.id,
                name: product.name,
                article_number: product.article_number,
                quantity: stock.quantity,
            });
        }
        lines.sort_by_key(|line| line.product_id);
        Ok(lines)
    }

    /// Finished-goods figure for one product across all workshops.
    #[instrument(skip(self))]
    pub async fn product_stock_all_workshops(
        &self,
        product_id: i64,
    ) -> Result<ProductStockSummary, ServiceError> {
        let db = self.db_pool.as_ref();
        products::find_product(db, product_id).await?;

        let stocks = ProductStocks::find()
            .filter(product_stock::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut per_workshop = Vec::with_capacity(stocks.len());
        let mut total = Decimal::ZERO;
        for stock in stocks {
            let workshop = workshops::find_workshop(db, stock.workshop_id).await?;
            total += stock.quantity;
            per_workshop.push(WorkshopProductStock {
                workshop_id: workshop.id,
                workshop_name: workshop.name,
                quantity: stock.quantity,
            });
        }
        per_workshop.sort_by_key(|w| w.workshop_id);

        Ok(ProductStockSummary {
            product_id,
            total,
            per_workshop,
        })
    }
}

/// Adds `quantity` to the (workshop, product) finished-goods counter,
/// creating it on first use. Returns the new balance.
async fn credit_product_stock<C: ConnectionTrait>(
    conn: &C,
    workshop_id: i64,
    product_id: i64,
    quantity: Decimal,
) -> Result<Decimal, ServiceError> {
    let existing = ProductStocks::find()
        .filter(product_stock::Column::ProductId.eq(product_id))
        .filter(product_stock::Column::WorkshopId.eq(workshop_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    match existing {
        Some(stock) => {
            let new_quantity = stock.quantity + quantity;
            let mut active: product_stock::ActiveModel = stock.into();
            active.quantity = Set(new_quantity);
            active.update(conn).await.map_err(ServiceError::db_error)?;
            Ok(new_quantity)
        }
        None => {
            product_stock::ActiveModel {
                workshop_id: Set(workshop_id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                ..Default::default()
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;
            Ok(quantity)
        }
    }
}
