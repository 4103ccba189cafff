use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    delivery::{self, Entity as Deliveries},
    delivery_item::{self, Entity as DeliveryItems},
    purchase_order::{self, Entity as PurchaseOrders},
    stock_movement::{ChangeKind, Origin},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{ledger, materials, workshops};

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryItemInput {
    pub material_id: i64,
    pub quantity: Decimal,
    #[serde(default)]
    pub note: String,
}

/// Full payload of a delivery. Updates replace the whole document, so the
/// same shape serves create and update.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryInput {
    pub workshop_id: i64,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub delivered_on: Option<NaiveDate>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub is_historical: bool,
    pub items: Vec<DeliveryItemInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryItemView {
    pub id: i64,
    pub material_id: i64,
    pub quantity: Decimal,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRef {
    pub id: i64,
    pub order_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDetail {
    pub id: i64,
    pub workshop_id: i64,
    pub order: Option<OrderRef>,
    pub delivered_on: Option<NaiveDate>,
    pub note: String,
    pub is_historical: bool,
    pub created_at: DateTime<Utc>,
    pub items: Vec<DeliveryItemView>,
}

/// Inbound goods receipts. Each non-historical delivery line materializes
/// one inbound movement carrying the delivery as origin; updates follow
/// delete-then-create semantics in a single transaction.
#[derive(Clone)]
pub struct DeliveryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl DeliveryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_delivery(
        &self,
        input: DeliveryInput,
    ) -> Result<DeliveryDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let order = validate_input(&txn, &input).await?;
        let suppressed = is_suppressed(&input, order.as_ref());

        let delivery = delivery::ActiveModel {
            workshop_id: Set(input.workshop_id),
            order_id: Set(input.order_id),
            delivered_on: Set(input.delivered_on),
            note: Set(input.note.clone()),
            is_historical: Set(input.is_historical),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        write_items_and_movements(&txn, &delivery, &input.items, suppressed).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::DeliveryCreated {
                delivery_id: delivery.id,
            })
            .await;

        self.get_delivery(delivery.id).await
    }

    /// Replaces a delivery wholesale: its movements are deleted by origin and
    /// re-created from the new payload, all in one transaction, so no
    /// intermediate state is observable.
    #[instrument(skip(self, input))]
    pub async fn update_delivery(
        &self,
        delivery_id: i64,
        input: DeliveryInput,
    ) -> Result<DeliveryDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let existing = find_delivery(&txn, delivery_id).await?;
        let order = validate_input(&txn, &input).await?;
        let suppressed = is_suppressed(&input, order.as_ref());

        ledger::delete_movements_for_origin(&txn, Origin::delivery(delivery_id)).await?;
        DeliveryItems::delete_many()
            .filter(delivery_item::Column::DeliveryId.eq(delivery_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut active: delivery::ActiveModel = existing.into();
        active.workshop_id = Set(input.workshop_id);
        active.order_id = Set(input.order_id);
        active.delivered_on = Set(input.delivered_on);
        active.note = Set(input.note.clone());
        active.is_historical = Set(input.is_historical);
        let delivery = active.update(&txn).await.map_err(ServiceError::db_error)?;

        write_items_and_movements(&txn, &delivery, &input.items, suppressed).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::DeliveryUpdated { delivery_id })
            .await;

        self.get_delivery(delivery_id).await
    }

    /// Removes the delivery together with its items and every movement it
    /// produced.
    #[instrument(skip(self))]
    pub async fn delete_delivery(&self, delivery_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let delivery = find_delivery(&txn, delivery_id).await?;

        ledger::delete_movements_for_origin(&txn, Origin::delivery(delivery_id)).await?;
        DeliveryItems::delete_many()
            .filter(delivery_item::Column::DeliveryId.eq(delivery_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        delivery
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::DeliveryDeleted { delivery_id })
            .await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_delivery(&self, delivery_id: i64) -> Result<DeliveryDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let delivery = find_delivery(db, delivery_id).await?;
        self.build_detail(delivery).await
    }

    /// All deliveries, newest first.
    #[instrument(skip(self))]
    pub async fn list_deliveries(&self) -> Result<Vec<DeliveryDetail>, ServiceError> {
        let db = self.db_pool.as_ref();
        let deliveries = Deliveries::find()
            .order_by_desc(delivery::Column::CreatedAt)
            .order_by_desc(delivery::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut details = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            details.push(self.build_detail(delivery).await?);
        }
        Ok(details)
    }

    async fn build_detail(
        &self,
        delivery: delivery::Model,
    ) -> Result<DeliveryDetail, ServiceError> {
        let db = self.db_pool.as_ref();

        let items = DeliveryItems::find()
            .filter(delivery_item::Column::DeliveryId.eq(delivery.id))
            .order_by_asc(delivery_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let order = match delivery.order_id {
            Some(order_id) => PurchaseOrders::find_by_id(order_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|o| OrderRef {
                    id: o.id,
                    order_number: o.order_number,
                }),
            None => None,
        };

        Ok(DeliveryDetail {
            id: delivery.id,
            workshop_id: delivery.workshop_id,
            order,
            delivered_on: delivery.delivered_on,
            note: delivery.note,
            is_historical: delivery.is_historical,
            created_at: delivery.created_at,
            items: items
                .into_iter()
                .map(|item| DeliveryItemView {
                    id: item.id,
                    material_id: item.material_id,
                    quantity: item.quantity,
                    note: item.note,
                })
                .collect(),
        })
    }
}

async fn find_delivery<C: ConnectionTrait>(
    conn: &C,
    delivery_id: i64,
) -> Result<delivery::Model, ServiceError> {
    Deliveries::find_by_id(delivery_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("delivery {}", delivery_id)))
}

/// A historical delivery, or one linked to a historical order, produces no
/// movements at all.
fn is_suppressed(input: &DeliveryInput, order: Option<&purchase_order::Model>) -> bool {
    input.is_historical || order.map(|o| o.is_historical).unwrap_or(false)
}

async fn validate_input<C: ConnectionTrait>(
    conn: &C,
    input: &DeliveryInput,
) -> Result<Option<purchase_order::Model>, ServiceError> {
    workshops::find_workshop(conn, input.workshop_id).await?;

    let order = match input.order_id {
        Some(order_id) => Some(
            PurchaseOrders::find_by_id(order_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found(format!("order {}", order_id)))?,
        ),
        None => None,
    };

    for item in &input.items {
        materials::find_material(conn, item.material_id).await?;
        if item.quantity <= Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "delivery quantity for material {} must be positive",
                item.material_id
            )));
        }
    }

    Ok(order)
}

async fn write_items_and_movements<C: ConnectionTrait>(
    conn: &C,
    delivery: &delivery::Model,
    items: &[DeliveryItemInput],
    suppressed: bool,
) -> Result<(), ServiceError> {
    for item in items {
        delivery_item::ActiveModel {
            delivery_id: Set(delivery.id),
            material_id: Set(item.material_id),
            quantity: Set(item.quantity),
            note: Set(item.note.clone()),
            ..Default::default()
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        if !suppressed {
            ledger::record_movement(
                conn,
                delivery.workshop_id,
                item.material_id,
                ChangeKind::InboundDelivery,
                item.quantity,
                format!("Delivery #{} - {}", delivery.id, item.note),
                Some(Origin::delivery(delivery.id)),
            )
            .await?;
        }
    }

    Ok(())
}
