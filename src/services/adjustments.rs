use rust_decimal::Decimal;
use sea_orm::TransactionTrait;
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::stock_movement::{self, ChangeKind};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_validation::{self, StockGuard};
use crate::services::{ledger, materials, workshops};

/// Origin-less corrections: free-form manual adjustments and computed
/// inventory-count reconciliations. Both are validated against the balance
/// under the pair's lock before they are appended.
#[derive(Clone)]
pub struct AdjustmentService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    stock_guard: Arc<StockGuard>,
}

impl AdjustmentService {
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

    /// Appends one manual adjustment of `delta` (signed; positive adds).
    #[instrument(skip(self, note))]
    pub async fn create_manual_adjustment(
        &self,
        workshop_id: i64,
        material_id: i64,
        delta: Decimal,
        note: impl Into<String>,
    ) -> Result<stock_movement::Model, ServiceError> {
        if delta.is_zero() {
            return Err(ServiceError::validation(
                "adjustment delta cannot be zero",
            ));
        }

        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let _guard = self.stock_guard.lock_pair(material_id, workshop_id).await;
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        stock_validation::ensure_stock_available(&txn, material_id, workshop_id, delta).await?;

        let movement = ledger::record_movement(
            &txn,
            workshop_id,
            material_id,
            ChangeKind::ManualAdjustment,
            delta,
            note,
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::StockAdjusted {
                workshop_id,
                material_id,
                delta,
            })
            .await;

        Ok(movement)
    }

    /// Reconciles the balance to a counted quantity.
    ///
    /// Appends one reconciliation movement of `counted - current`; a zero
    /// delta is rejected rather than recorded as a no-op row.
    #[instrument(skip(self))]
    pub async fn reconcile_inventory(
        &self,
        workshop_id: i64,
        material_id: i64,
        counted: Decimal,
    ) -> Result<stock_movement::Model, ServiceError> {
        if counted < Decimal::ZERO {
            return Err(ServiceError::validation(
                "counted quantity cannot be negative",
            ));
        }

        let db = self.db_pool.as_ref();
        materials::find_material(db, material_id).await?;
        workshops::find_workshop(db, workshop_id).await?;

        let _guard = self.stock_guard.lock_pair(material_id, workshop_id).await;
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let current = ledger::current_stock(&txn, material_id, workshop_id).await?;
        let delta = counted - current;
        if delta.is_zero() {
            return Err(ServiceError::validation(format!(
                "stock of material {} in workshop {} is already {}; nothing to reconcile",
                material_id, workshop_id, current
            )));
        }

        let note = format!(
            "Inventory count: counted {}, recorded {}, delta {}",
            counted, current, delta
        );
        let movement = ledger::record_movement(
            &txn,
            workshop_id,
            material_id,
            ChangeKind::InventoryReconciliation,
            delta,
            note,
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::InventoryReconciled {
                workshop_id,
                material_id,
                delta,
            })
            .await;

        Ok(movement)
    }
}
