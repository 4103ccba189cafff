use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::{
    material,
    stock_movement::{ChangeKind, Origin},
    transfer::{self, Entity as Transfers},
    transfer_item::{self, Entity as TransferItems},
    workshop,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_validation::{self, StockGuard};
use crate::services::{ledger, materials, workshops};

#[derive(Debug, Clone, Deserialize)]
pub struct TransferItemInput {
    pub material_id: i64,
    pub quantity: Decimal,
    #[serde(default)]
    pub note: String,
}

/// Full payload of a transfer; updates replace the whole document.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub source_workshop_id: i64,
    pub target_workshop_id: i64,
    #[serde(default)]
    pub note: String,
    pub items: Vec<TransferItemInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferItemView {
    pub id: i64,
    pub material_id: i64,
    pub quantity: Decimal,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    pub id: i64,
    pub source_workshop_id: i64,
    pub target_workshop_id: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<TransferItemView>,
}

/// Workshop-to-workshop stock moves.
///
/// Every committed line yields one transfer-out movement at the source and
/// one transfer-in movement at the target, both tagged with the transfer as
/// origin and created together or not at all. A single line without cover at
/// the source rejects the whole document before anything is written.
#[derive(Clone)]
pub struct TransferService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    stock_guard: Arc<StockGuard>,
}

impl TransferService {
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

    #[instrument(skip(self, input))]
    pub async fn create_transfer(
        &self,
        input: TransferInput,
    ) -> Result<TransferDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let (source, _target) = validate_input(db, &input).await?;

        let lock_keys: Vec<(i64, i64)> = input
            .items
            .iter()
            .map(|item| (item.material_id, input.source_workshop_id))
            .collect();
        let _guards = self.stock_guard.lock_pairs(lock_keys).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        validate_source_cover(&txn, &input, &source).await?;

        let created = transfer::ActiveModel {
            source_workshop_id: Set(input.source_workshop_id),
            target_workshop_id: Set(input.target_workshop_id),
            note: Set(input.note.clone()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        write_items_and_movements(&txn, &created, &input.items).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::TransferCreated {
                transfer_id: created.id,
            })
            .await;

        self.get_transfer(created.id).await
    }

    /// Replaces the transfer wholesale. Old movements are removed by origin
    /// first, so the new lines validate against the balance without them,
    /// and re-submitting an identical payload leaves stock unchanged.
    #[instrument(skip(self, input))]
    pub async fn update_transfer(
        &self,
        transfer_id: i64,
        input: TransferInput,
    ) -> Result<TransferDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let existing = find_transfer(db, transfer_id).await?;
        let (source, _target) = validate_input(db, &input).await?;

        // Lock the pairs of the movements being removed as well as those of
        // the new lines; the removal changes balances on both old sides.
        let old_movements =
            ledger::movements_for_origin(db, Origin::transfer(transfer_id)).await?;
        let mut lock_keys: Vec<(i64, i64)> = old_movements
            .iter()
            .map(|m| (m.material_id, m.workshop_id))
            .collect();
        lock_keys.extend(
            input
                .items
                .iter()
                .map(|item| (item.material_id, input.source_workshop_id)),
        );
        let _guards = self.stock_guard.lock_pairs(lock_keys).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        ledger::delete_movements_for_origin(&txn, Origin::transfer(transfer_id)).await?;
        TransferItems::delete_many()
            .filter(transfer_item::Column::TransferId.eq(transfer_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        validate_source_cover(&txn, &input, &source).await?;

        let mut active: transfer::ActiveModel = existing.into();
        active.source_workshop_id = Set(input.source_workshop_id);
        active.target_workshop_id = Set(input.target_workshop_id);
        active.note = Set(input.note.clone());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        write_items_and_movements(&txn, &updated, &input.items).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::TransferUpdated { transfer_id })
            .await;

        self.get_transfer(transfer_id).await
    }

    /// Removes the transfer and both movements of every line, restoring the
    /// source and target balances exactly.
    #[instrument(skip(self))]
    pub async fn delete_transfer(&self, transfer_id: i64) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let transfer = find_transfer(db, transfer_id).await?;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        ledger::delete_movements_for_origin(&txn, Origin::transfer(transfer_id)).await?;
        TransferItems::delete_many()
            .filter(transfer_item::Column::TransferId.eq(transfer_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        transfer
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::TransferDeleted { transfer_id })
            .await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_transfer(&self, transfer_id: i64) -> Result<TransferDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let transfer = find_transfer(db, transfer_id).await?;

        let items = TransferItems::find()
            .filter(transfer_item::Column::TransferId.eq(transfer_id))
            .order_by_asc(transfer_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(build_detail(transfer, items))
    }

    /// All transfers, newest first.
    #[instrument(skip(self))]
    pub async fn list_transfers(&self) -> Result<Vec<TransferDetail>, ServiceError> {
        let db = self.db_pool.as_ref();
        let transfers = Transfers::find()
            .order_by_desc(transfer::Column::CreatedAt)
            .order_by_desc(transfer::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut details = Vec::with_capacity(transfers.len());
        for t in transfers {
            let items = TransferItems::find()
                .filter(transfer_item::Column::TransferId.eq(t.id))
                .order_by_asc(transfer_item::Column::Id)
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;
            details.push(build_detail(t, items));
        }
        Ok(details)
    }
}

async fn find_transfer<C: ConnectionTrait>(
    conn: &C,
    transfer_id: i64,
) -> Result<transfer::Model, ServiceError> {
    Transfers::find_by_id(transfer_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found(format!("transfer {}", transfer_id)))
}

fn build_detail(transfer: transfer::Model, items: Vec<transfer_item::Model>) -> TransferDetail {
    TransferDetail {
        id: transfer.id,
        source_workshop_id: transfer.source_workshop_id,
        target_workshop_id: transfer.target_workshop_id,
        note: transfer.note,
        created_at: transfer.created_at,
        items: items
            .into_iter()
            .map(|item| TransferItemView {
                id: item.id,
                material_id: item.material_id,
                quantity: item.quantity,
                note: item.note,
            })
            .collect(),
    }
}

async fn validate_input<C: ConnectionTrait>(
    conn: &C,
    input: &TransferInput,
) -> Result<(workshop::Model, workshop::Model), ServiceError> {
    if input.source_workshop_id == input.target_workshop_id {
        return Err(ServiceError::validation(
            "source and target workshop must differ",
        ));
    }

    let source = workshops::find_workshop(conn, input.source_workshop_id).await?;
    let target = workshops::find_workshop(conn, input.target_workshop_id).await?;

    for item in &input.items {
        materials::find_material(conn, item.material_id).await?;
        if item.quantity <= Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "transfer quantity for material {} must be positive",
                item.material_id
            )));
        }
    }

    Ok((source, target))
}

/// Checks every line against the source balance before anything is written.
/// Lines of the same material are validated as one cumulative withdrawal.
async fn validate_source_cover<C: ConnectionTrait>(
    conn: &C,
    input: &TransferInput,
    source: &workshop::Model,
) -> Result<(), ServiceError> {
    let mut totals: BTreeMap<i64, Decimal> = BTreeMap::new();
    for item in &input.items {
        *totals.entry(item.material_id).or_default() += item.quantity;
    }

    for (material_id, total) in totals {
        let validation = stock_validation::validate_movement(
            conn,
            material_id,
            input.source_workshop_id,
            -total,
        )
        .await?;
        if !validation.valid {
            let name = material::Entity::find_by_id(material_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .map(|m| m.name)
                .unwrap_or_else(|| format!("material {}", material_id));
            return Err(ServiceError::InsufficientStock(format!(
                "material '{}' in workshop '{}': {}",
                name, source.name, validation.message
            )));
        }
    }

    Ok(())
}

/// Persists line items and the movement pair each one produces.
async fn write_items_and_movements<C: ConnectionTrait>(
    conn: &C,
    transfer: &transfer::Model,
    items: &[TransferItemInput],
) -> Result<(), ServiceError> {
    for item in items {
        transfer_item::ActiveModel {
            transfer_id: Set(transfer.id),
            material_id: Set(item.material_id),
            quantity: Set(item.quantity),
            note: Set(item.note.clone()),
            ..Default::default()
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        let note = format!("Transfer #{} - {}", transfer.id, item.note);

        ledger::record_movement(
            conn,
            transfer.source_workshop_id,
            item.material_id,
            ChangeKind::TransferOut,
            item.quantity,
            note.clone(),
            Some(Origin::transfer(transfer.id)),
        )
        .await?;

        ledger::record_movement(
            conn,
            transfer.target_workshop_id,
            item.material_id,
            ChangeKind::TransferIn,
            item.quantity,
            note,
            Some(Origin::transfer(transfer.id)),
        )
        .await?;
    }

    Ok(())
}
