use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    delivery::{self, Entity as Deliveries},
    purchase_order::{self, Entity as PurchaseOrders},
    purchase_order_item::{self, Entity as PurchaseOrderItems},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::materials;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemInput {
    pub material_id: i64,
    pub quantity: Decimal,
    pub price_per_unit: Decimal,
    #[serde(default)]
    pub note: String,
}

/// Full payload of a purchase order; updates replace the item list.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInput {
    #[serde(default)]
    pub order_number: Option<String>,
    pub ordered_on: NaiveDate,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub is_historical: bool,
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemView {
    pub id: i64,
    pub material_id: i64,
    pub quantity: Decimal,
    pub price_per_unit: Decimal,
    /// Unit price with the quantity-proportional share of the order's
    /// shipping cost folded in, rounded half-up to cents.
    pub price_per_unit_with_shipping: Decimal,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub id: i64,
    pub order_number: String,
    pub ordered_on: NaiveDate,
    /// Derived from linked deliveries: the earliest delivery date, if any.
    pub arrived_on: Option<NaiveDate>,
    pub shipping_cost: Option<Decimal>,
    pub note: String,
    pub is_historical: bool,
    pub items: Vec<OrderItemView>,
}

/// Purchasing documents. Orders never touch the ledger themselves; their
/// open quantities feed the requirements engine until a linked delivery
/// marks them as arrived.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_order(&self, input: OrderInput) -> Result<OrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        validate_input(&txn, &input, None).await?;

        let order = purchase_order::ActiveModel {
            order_number: Set(input.order_number.clone().unwrap_or_default()),
            ordered_on: Set(input.ordered_on),
            shipping_cost: Set(input.shipping_cost),
            note: Set(input.note.clone()),
            is_historical: Set(input.is_historical),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let order = ensure_order_number(&txn, order).await?;
        write_items(&txn, order.id, &input.items).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::OrderCreated { order_id: order.id })
            .await;

        self.get_order(order.id).await
    }

    #[instrument(skip(self, input))]
    pub async fn update_order(
        &self,
        order_id: i64,
        input: OrderInput,
    ) -> Result<OrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let existing = find_order(&txn, order_id).await?;
        validate_input(&txn, &input, Some(order_id)).await?;

        let mut active: purchase_order::ActiveModel = existing.into();
        active.order_number = Set(input.order_number.clone().unwrap_or_default());
        active.ordered_on = Set(input.ordered_on);
        active.shipping_cost = Set(input.shipping_cost);
        active.note = Set(input.note.clone());
        active.is_historical = Set(input.is_historical);
        let order = active.update(&txn).await.map_err(ServiceError::db_error)?;

        let order = ensure_order_number(&txn, order).await?;

        PurchaseOrderItems::delete_many()
            .filter(purchase_order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        write_items(&txn, order.id, &input.items).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::OrderUpdated { order_id })
            .await;

        self.get_order(order_id).await
    }

    /// Removes the order and its items. Linked deliveries survive with their
    /// order reference cleared; their movements are untouched.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let order = find_order(&txn, order_id).await?;

        PurchaseOrderItems::delete_many()
            .filter(purchase_order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        order.delete(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::OrderDeleted { order_id })
            .await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: i64) -> Result<OrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = find_order(db, order_id).await?;
        self.build_detail(order).await
    }

    /// All orders, most recently ordered first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self) -> Result<Vec<OrderDetail>, ServiceError> {
        let db = self.db_pool.as_ref();
        let orders = PurchaseOrders::find()
            .order_by_desc(purchase_order::Column::OrderedOn)
            .order_by_desc(purchase_order::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            details.push(self.build_detail(order).await?);
        }
        Ok(details)
    }

    async fn build_detail(
        &self,
        order: purchase_order::Model,
    ) -> Result<OrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();

        let items = PurchaseOrderItems::find()
            .filter(purchase_order_item::Column::OrderId.eq(order.id))
            .order_by_asc(purchase_order_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let deliveries = Deliveries::find()
            .filter(delivery::Column::OrderId.eq(order.id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let arrived_on = deliveries
            .iter()
            .map(|d| d.delivered_on.unwrap_or_else(|| d.created_at.date_naive()))
            .min();

        let total_quantity: Decimal = items.iter().map(|item| item.quantity).sum();
        let shipping_share = shipping_share_per_unit(order.shipping_cost, total_quantity);

        Ok(OrderDetail {
            id: order.id,
            order_number: order.order_number,
            ordered_on: order.ordered_on,
            arrived_on,
            shipping_cost: order.shipping_cost,
            note: order.note,
            is_historical: order.is_historical,
            items: items
                .into_iter()
                .map(|item| {
                    let with_shipping = (item.price_per_unit + shipping_share)
                        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
                    OrderItemView {
                        id: item.id,
                        material_id: item.material_id,
                        quantity: item.quantity,
                        price_per_unit: item.price_per_unit,
                        price_per_unit_with_shipping: with_shipping,
                        note: item.note,
                    }
                })
                .collect(),
        })
    }
}

/// On-order quantity per material over outstanding orders: not historical
/// and with no linked delivery yet. Orders are not workshop-scoped, so
/// neither is this figure.
pub async fn outstanding_quantities<C: ConnectionTrait>(
    conn: &C,
    material_ids: &[i64],
) -> Result<HashMap<i64, Decimal>, ServiceError> {
    if material_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let items = PurchaseOrderItems::find()
        .filter(purchase_order_item::Column::MaterialId.is_in(material_ids.to_vec()))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    if items.is_empty() {
        return Ok(HashMap::new());
    }

    let order_ids: HashSet<i64> = items.iter().map(|item| item.order_id).collect();

    let orders = PurchaseOrders::find()
        .filter(purchase_order::Column::Id.is_in(order_ids.iter().copied().collect::<Vec<_>>()))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    let historical: HashSet<i64> = orders
        .iter()
        .filter(|o| o.is_historical)
        .map(|o| o.id)
        .collect();

    let arrived: HashSet<i64> = Deliveries::find()
        .filter(delivery::Column::OrderId.is_in(order_ids.iter().copied().collect::<Vec<_>>()))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?
        .iter()
        .filter_map(|d| d.order_id)
        .collect();

    let mut totals: HashMap<i64, Decimal> = HashMap::new();
    for item in items {
        if historical.contains(&item.order_id) || arrived.contains(&item.order_id) {
            continue;
        }
        *totals.entry(item.material_id).or_default() += item.quantity;
    }

    Ok(totals)
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrders::find_by_id(order_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("order {}", order_id)))
}

async fn validate_input<C: ConnectionTrait>(
    conn: &C,
    input: &OrderInput,
    updating: Option<i64>,
) -> Result<(), ServiceError> {
    if let Some(number) = input.order_number.as_deref().filter(|n| !n.is_empty()) {
        let mut query =
            PurchaseOrders::find().filter(purchase_order::Column::OrderNumber.eq(number));
        if let Some(order_id) = updating {
            query = query.filter(purchase_order::Column::Id.ne(order_id));
        }
        if query
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "order number '{}' is already in use",
                number
            )));
        }
    }

    if let Some(shipping) = input.shipping_cost {
        if shipping < Decimal::ZERO {
            return Err(ServiceError::validation("shipping cost cannot be negative"));
        }
    }

    for item in &input.items {
        materials::find_material(conn, item.material_id).await?;
        if item.quantity <= Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "order quantity for material {} must be positive",
                item.material_id
            )));
        }
        if item.price_per_unit < Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "unit price for material {} cannot be negative",
                item.material_id
            )));
        }
    }

    Ok(())
}

/// Fills in `ORD-{year}-{id:05}` when no order number was supplied.
async fn ensure_order_number<C: ConnectionTrait>(
    conn: &C,
    order: purchase_order::Model,
) -> Result<purchase_order::Model, ServiceError> {
    if !order.order_number.is_empty() {
        return Ok(order);
    }

    let number = format!("ORD-{}-{:05}", order.ordered_on.year(), order.id);
    let mut active: purchase_order::ActiveModel = order.into();
    active.order_number = Set(number);
    active.update(conn).await.map_err(ServiceError::db_error)
}

async fn write_items<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
    items: &[OrderItemInput],
) -> Result<(), ServiceError> {
    for item in items {
        purchase_order_item::ActiveModel {
            order_id: Set(order_id),
            material_id: Set(item.material_id),
            quantity: Set(item.quantity),
            price_per_unit: Set(item.price_per_unit),
            note: Set(item.note.clone()),
            ..Default::default()
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

/// Per-unit share of the shipping cost: the cost spread over the order's
/// total quantity, which is the same for every unit regardless of line.
fn shipping_share_per_unit(shipping_cost: Option<Decimal>, total_quantity: Decimal) -> Decimal {
    match shipping_cost {
        Some(cost) if cost > Decimal::ZERO && total_quantity > Decimal::ZERO => {
            cost / total_quantity
        }
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shipping_share_spreads_over_total_quantity() {
        assert_eq!(shipping_share_per_unit(Some(dec!(10)), dec!(20)), dec!(0.5));
        assert_eq!(shipping_share_per_unit(None, dec!(20)), Decimal::ZERO);
        assert_eq!(shipping_share_per_unit(Some(dec!(10)), dec!(0)), Decimal::ZERO);
        assert_eq!(shipping_share_per_unit(Some(dec!(0)), dec!(5)), Decimal::ZERO);
    }
}
