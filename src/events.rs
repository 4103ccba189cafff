use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::entities::stock_movement::ChangeKind;

/// Domain events published after a successful commit.
///
/// Events are fire-and-forget notifications for downstream consumers
/// (reporting, cache invalidation); the ledger itself never depends on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementRecorded {
        movement_id: i64,
        workshop_id: i64,
        material_id: i64,
        kind: ChangeKind,
        quantity: Decimal,
    },
    MovementCorrected {
        movement_id: i64,
    },
    MovementDeleted {
        movement_id: i64,
    },

    DeliveryCreated {
        delivery_id: i64,
    },
    DeliveryUpdated {
        delivery_id: i64,
    },
    DeliveryDeleted {
        delivery_id: i64,
    },

    TransferCreated {
        transfer_id: i64,
    },
    TransferUpdated {
        transfer_id: i64,
    },
    TransferDeleted {
        transfer_id: i64,
    },

    OrderCreated {
        order_id: i64,
    },
    OrderUpdated {
        order_id: i64,
    },
    OrderDeleted {
        order_id: i64,
    },

    StockAdjusted {
        workshop_id: i64,
        material_id: i64,
        delta: Decimal,
    },
    InventoryReconciled {
        workshop_id: i64,
        material_id: i64,
        delta: Decimal,
    },
    ProductManufactured {
        product_id: i64,
        workshop_id: i64,
        quantity: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Post-commit publication: a full or closed channel is logged, never
    /// propagated to the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            let payload =
                serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
            warn!(event = %payload, "failed to publish event: {}", e);
        }
    }
}
