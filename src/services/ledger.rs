use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    material, material_category,
    stock_movement::{self, ChangeKind, Entity as StockMovements, Origin},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_validation::StockGuard;
use crate::services::{materials, workshops};

/// Appends one movement row: the durable append operation of the ledger.
///
/// The kind's sign is applied to `quantity` here, so directional kinds take
/// a non-negative magnitude and adjustment kinds a signed delta. No business
/// validation happens at this level; outbound paths run
/// [`crate::services::stock_validation`] first, under the pair's lock.
pub async fn record_movement<C: ConnectionTrait>(
    conn: &C,
    workshop_id: i64,
    material_id: i64,
    kind: ChangeKind,
    quantity: Decimal,
    note: impl Into<String>,
    origin: Option<Origin>,
) -> Result<stock_movement::Model, ServiceError> {
    let movement = stock_movement::ActiveModel {
        workshop_id: Set(workshop_id),
        material_id: Set(material_id),
        change_kind: Set(kind.as_str().to_string()),
        quantity: Set(kind.signed(quantity)),
        note: Set(note.into()),
        origin_kind: Set(origin.map(|o| o.kind.as_str().to_string())),
        origin_id: Set(origin.map(|o| o.id)),
        ..Default::default()
    };

    movement.insert(conn).await.map_err(ServiceError::db_error)
}

/// Signed sum over a slice of movements. Quantities are stored with their
/// sign already applied, so this is a plain fold.
pub fn balance_of(movements: &[stock_movement::Model]) -> Decimal {
    movements.iter().map(|m| m.quantity).sum()
}

/// Current balance of one (material, workshop) pair, computed on demand from
/// the raw event list, which stays the audit source of truth.
pub async fn current_stock<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
    workshop_id: i64,
) -> Result<Decimal, ServiceError> {
    let movements = StockMovements::find()
        .filter(stock_movement::Column::MaterialId.eq(material_id))
        .filter(stock_movement::Column::WorkshopId.eq(workshop_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(balance_of(&movements))
}

/// Balance over the material itself plus all of its alternatives, scoped to
/// one workshop.
pub async fn available_stock<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
    workshop_id: i64,
) -> Result<Decimal, ServiceError> {
    let mut total = current_stock(conn, material_id, workshop_id).await?;
    for alternative_id in materials::alternative_ids(conn, material_id).await? {
        total += current_stock(conn, alternative_id, workshop_id).await?;
    }
    Ok(total)
}

/// All movements produced by one document, oldest first.
pub async fn movements_for_origin<C: ConnectionTrait>(
    conn: &C,
    origin: Origin,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    StockMovements::find()
        .filter(stock_movement::Column::OriginKind.eq(origin.kind.as_str()))
        .filter(stock_movement::Column::OriginId.eq(origin.id))
        .order_by_asc(stock_movement::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Removes every movement produced by one document. The replace half of the
/// documents' delete-then-recreate update semantics.
pub async fn delete_movements_for_origin<C: ConnectionTrait>(
    conn: &C,
    origin: Origin,
) -> Result<u64, ServiceError> {
    let result = StockMovements::delete_many()
        .filter(stock_movement::Column::OriginKind.eq(origin.kind.as_str()))
        .filter(stock_movement::Column::OriginId.eq(origin.id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(result.rows_affected)
}

/// Stock of one material in one workshop, with the same figure for each of
/// its alternatives.
#[derive(Debug, Clone, Serialize)]
pub struct MaterialStock {
    pub material_id: i64,
    pub name: String,
    pub manufacturer_name: String,
    pub order_number: String,
    pub category: Option<String>,
    pub workshop_id: i64,
    pub current_stock: Decimal,
    pub alternatives: Vec<AlternativeStock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternativeStock {
    pub material_id: i64,
    pub name: String,
    pub manufacturer_name: String,
    pub order_number: String,
    pub current_stock: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialStockLine {
    pub material_id: i64,
    pub name: String,
    pub manufacturer_name: String,
    pub order_number: String,
    pub deprecated: bool,
    pub current_stock: Decimal,
}

/// One category bucket of the per-workshop stock overview. Uncategorized
/// materials come last under a `None` category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStockGroup {
    pub category_id: Option<i64>,
    pub category_name: String,
    pub materials: Vec<MaterialStockLine>,
}

/// Query surface of the movement ledger.
#[derive(Clone)]
pub struct LedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    stock_guard: Arc<StockGuard>,
}

impl LedgerService {
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

    /// Current balance for a known material/workshop pair.
    #[instrument(skip(self))]
    pub async fn current_stock(
        &self,
        material_id: i64,
        workshop_id: i64,
    ) -> Result<Decimal, ServiceError> {
        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;
        workshops::find_workshop(db, workshop_id).await?;
        current_stock(db, material_id, workshop_id).await
    }

    /// Direct append of an origin-less movement.
    ///
    /// This is the raw ledger operation: it never validates the balance.
    /// Validated flows (consumption, loss, adjustments) go through
    /// [`crate::services::adjustments::AdjustmentService`] instead.
    #[instrument(skip(self, note))]
    pub async fn record_movement(
        &self,
        workshop_id: i64,
        material_id: i64,
        kind: ChangeKind,
        quantity: Decimal,
        note: impl Into<String>,
    ) -> Result<stock_movement::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let movement =
            record_movement(db, workshop_id, material_id, kind, quantity, note, None).await?;

        self.event_sender
            .send_or_log(Event::MovementRecorded {
                movement_id: movement.id,
                workshop_id,
                material_id,
                kind,
                quantity: movement.quantity,
            })
            .await;

        Ok(movement)
    }

    /// Movement history of a material, newest first, optionally scoped to
    /// one workshop.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        material_id: i64,
        workshop_id: Option<i64>,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;

        let mut query =
            StockMovements::find().filter(stock_movement::Column::MaterialId.eq(material_id));
        if let Some(workshop_id) = workshop_id {
            query = query.filter(stock_movement::Column::WorkshopId.eq(workshop_id));
        }

        query
            .order_by_desc(stock_movement::Column::CreatedAt)
            .order_by_desc(stock_movement::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Corrects quantity and note of an origin-less movement.
    ///
    /// Movements produced by a document can only be replaced through that
    /// document; editing them here is a consistency violation. The new
    /// quantity follows the row's kind convention (magnitude for directional
    /// kinds, signed delta for adjustments) and the resulting balance is
    /// re-validated.
    #[instrument(skip(self))]
    pub async fn update_movement(
        &self,
        movement_id: i64,
        quantity: Decimal,
        note: Option<String>,
    ) -> Result<stock_movement::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let movement = StockMovements::find_by_id(movement_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found(format!("movement {}", movement_id)))?;

        if movement.origin().is_some() {
            return Err(ServiceError::ConsistencyError(format!(
                "movement {} belongs to a document and can only be changed through it",
                movement_id
            )));
        }

        let kind = movement.kind().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "movement {} has unknown change kind '{}'",
                movement_id, movement.change_kind
            ))
        })?;
        let new_quantity = kind.signed(quantity);

        let _guard = self
            .stock_guard
            .lock_pair(movement.material_id, movement.workshop_id)
            .await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let current = current_stock(&txn, movement.material_id, movement.workshop_id).await?;
        let resulting = current - movement.quantity + new_quantity;
        if resulting < Decimal::ZERO {
            return Err(ServiceError::InsufficientStock(format!(
                "correcting movement {} of material {} in workshop {} from {} to {} \
                 would leave stock at {}",
                movement_id,
                movement.material_id,
                movement.workshop_id,
                movement.quantity,
                new_quantity,
                resulting
            )));
        }

        let mut active: stock_movement::ActiveModel = movement.into();
        active.quantity = Set(new_quantity);
        if let Some(note) = note {
            active.note = Set(note);
        }
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::MovementCorrected { movement_id })
            .await;

        Ok(updated)
    }

    /// Deletes an origin-less movement. Document-produced movements can only
    /// be removed by deleting or updating their document.
    #[instrument(skip(self))]
    pub async fn delete_movement(&self, movement_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();

        let movement = StockMovements::find_by_id(movement_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found(format!("movement {}", movement_id)))?;

        if movement.origin().is_some() {
            return Err(ServiceError::ConsistencyError(format!(
                "movement {} belongs to a document and can only be removed through it",
                movement_id
            )));
        }

        movement.delete(db).await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::MovementDeleted { movement_id })
            .await;

        Ok(())
    }

    /// Stock of one material in one workshop, including each alternative's
    /// own balance.
    #[instrument(skip(self))]
    pub async fn material_stock(
        &self,
        material_id: i64,
        workshop_id: i64,
    ) -> Result<MaterialStock, ServiceError> {
        let db = self.db_pool.as_ref();
        let material = materials::find_material(db, material_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let category = match material.category_id {
            Some(category_id) => material_category::Entity::find_by_id(category_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|c| c.name),
            None => None,
        };

        let stock = current_stock(db, material_id, workshop_id).await?;

        let mut alternatives = Vec::new();
        for alternative_id in materials::alternative_ids(db, material_id).await? {
            let alternative = materials::find_material(db, alternative_id).await?;
            let alternative_stock = current_stock(db, alternative_id, workshop_id).await?;
            alternatives.push(AlternativeStock {
                material_id: alternative.id,
                name: alternative.name,
                manufacturer_name: alternative.manufacturer_name,
                order_number: alternative.order_number,
                current_stock: alternative_stock,
            });
        }

        Ok(MaterialStock {
            material_id: material.id,
            name: material.name,
            manufacturer_name: material.manufacturer_name,
            order_number: material.order_number,
            category,
            workshop_id,
            current_stock: stock,
            alternatives,
        })
    }

    /// Stock of every material in one workshop, grouped by category in sort
    /// order. The read-only overview external collaborators consume.
    #[instrument(skip(self))]
    pub async fn workshop_stock_overview(
        &self,
        workshop_id: i64,
    ) -> Result<Vec<CategoryStockGroup>, ServiceError> {
        let db = self.db_pool.as_ref();
        workshops::find_workshop(db, workshop_id).await?;

        let movements = StockMovements::find()
            .filter(stock_movement::Column::WorkshopId.eq(workshop_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut balances: HashMap<i64, Decimal> = HashMap::new();
        for movement in movements {
            *balances.entry(movement.material_id).or_default() += movement.quantity;
        }

        let mut all_materials = material::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        all_materials.sort_by_key(|m| m.name.to_lowercase());

        let mut categories = material_category::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        categories.sort_by_key(|c| (c.sort_order, c.id));

        let line = |m: &material::Model| MaterialStockLine {
            material_id: m.id,
            name: m.name.clone(),
            manufacturer_name: m.manufacturer_name.clone(),
            order_number: m.order_number.clone(),
            deprecated: m.deprecated,
            current_stock: balances.get(&m.id).copied().unwrap_or_default(),
        };

        let mut groups = Vec::new();
        for category in &categories {
            groups.push(CategoryStockGroup {
                category_id: Some(category.id),
                category_name: category.name.clone(),
                materials: all_materials
                    .iter()
                    .filter(|m| m.category_id == Some(category.id))
                    .map(line)
                    .collect(),
            });
        }

        let uncategorized: Vec<MaterialStockLine> = all_materials
            .iter()
            .filter(|m| m.category_id.is_none())
            .map(line)
            .collect();
        if !uncategorized.is_empty() {
            groups.push(CategoryStockGroup {
                category_id: None,
                category_name: "Uncategorized".to_string(),
                materials: uncategorized,
            });
        }

        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn movement(kind: ChangeKind, magnitude: Decimal) -> stock_movement::Model {
        stock_movement::Model {
            id: 0,
            workshop_id: 1,
            material_id: 1,
            change_kind: kind.as_str().to_string(),
            quantity: kind.signed(magnitude),
            note: String::new(),
            created_at: Utc::now(),
            origin_kind: None,
            origin_id: None,
        }
    }

    #[test]
    fn balance_folds_signed_quantities() {
        let history = vec![
            movement(ChangeKind::InboundDelivery, dec!(10)),
            movement(ChangeKind::Consumption, dec!(4)),
            movement(ChangeKind::ManualAdjustment, dec!(-1.50)),
            movement(ChangeKind::TransferIn, dec!(2)),
        ];
        assert_eq!(balance_of(&history), dec!(6.50));
    }

    fn kind_strategy() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::InboundDelivery),
            Just(ChangeKind::Consumption),
            Just(ChangeKind::Loss),
            Just(ChangeKind::ManualAdjustment),
            Just(ChangeKind::InventoryReconciliation),
            Just(ChangeKind::TransferOut),
            Just(ChangeKind::TransferIn),
        ]
    }

    proptest! {
        /// The balance is the signed sum of the history, independent of
        /// insertion order.
        #[test]
        fn balance_is_order_independent(
            entries in prop::collection::vec((kind_strategy(), 0i64..10_000), 0..64),
            rotation in 0usize..64,
        ) {
            let history: Vec<stock_movement::Model> = entries
                .iter()
                .map(|(kind, cents)| movement(*kind, Decimal::new(*cents, 2)))
                .collect();

            let expected: Decimal = entries
                .iter()
                .map(|(kind, cents)| kind.signed(Decimal::new(*cents, 2)))
                .sum();
            prop_assert_eq!(balance_of(&history), expected);

            let mut reordered = history.clone();
            if !reordered.is_empty() {
                let pivot = rotation % reordered.len();
                reordered.rotate_left(pivot);
                reordered.reverse();
            }
            prop_assert_eq!(balance_of(&reordered), expected);
        }
    }
}
