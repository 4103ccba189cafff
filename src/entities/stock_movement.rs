use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// Kinds of stock change carried by the ledger.
///
/// Corrections come in two flavors with distinct validation and audit
/// semantics: free-form `ManualAdjustment` and computed
/// `InventoryReconciliation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    InboundDelivery,
    Consumption,
    Loss,
    ManualAdjustment,
    InventoryReconciliation,
    TransferOut,
    TransferIn,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::InboundDelivery => "delivery",
            ChangeKind::Consumption => "consumption",
            ChangeKind::Loss => "loss",
            ChangeKind::ManualAdjustment => "manual_adjustment",
            ChangeKind::InventoryReconciliation => "inventory_reconciliation",
            ChangeKind::TransferOut => "transfer_out",
            ChangeKind::TransferIn => "transfer_in",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(ChangeKind::InboundDelivery),
            "consumption" => Some(ChangeKind::Consumption),
            "loss" => Some(ChangeKind::Loss),
            "manual_adjustment" => Some(ChangeKind::ManualAdjustment),
            "inventory_reconciliation" => Some(ChangeKind::InventoryReconciliation),
            "transfer_out" => Some(ChangeKind::TransferOut),
            "transfer_in" => Some(ChangeKind::TransferIn),
            _ => None,
        }
    }

    /// Applies this kind's sign to a quantity before it is persisted.
    ///
    /// Directional kinds take a non-negative magnitude; the two adjustment
    /// kinds carry a caller-supplied signed delta and pass it through.
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            ChangeKind::InboundDelivery | ChangeKind::TransferIn => quantity,
            ChangeKind::Consumption | ChangeKind::Loss | ChangeKind::TransferOut => -quantity,
            ChangeKind::ManualAdjustment | ChangeKind::InventoryReconciliation => quantity,
        }
    }
}

/// Document kinds a movement can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginKind {
    Delivery,
    Transfer,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Delivery => "delivery",
            OriginKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(OriginKind::Delivery),
            "transfer" => Some(OriginKind::Transfer),
            _ => None,
        }
    }
}

/// Weak reference from a movement to the document that produced it.
///
/// Used for audit and cascade lookup only, never an ownership relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub kind: OriginKind,
    pub id: i64,
}

impl Origin {
    pub fn delivery(id: i64) -> Self {
        Self {
            kind: OriginKind::Delivery,
            id,
        }
    }

    pub fn transfer(id: i64) -> Self {
        Self {
            kind: OriginKind::Transfer,
            id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub workshop_id: i64,
    pub material_id: i64,
    pub change_kind: String, // Storing as string in DB, converted to/from ChangeKind
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub quantity: Decimal,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub origin_kind: Option<String>,
    pub origin_id: Option<i64>,
}

impl Model {
    pub fn kind(&self) -> Option<ChangeKind> {
        ChangeKind::from_str(&self.change_kind)
    }

    pub fn origin(&self) -> Option<Origin> {
        match (self.origin_kind.as_deref(), self.origin_id) {
            (Some(kind), Some(id)) => OriginKind::from_str(kind).map(|kind| Origin { kind, id }),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::workshop::Entity",
        from = "Column::WorkshopId",
        to = "super::workshop::Column::Id"
    )]
    Workshop,
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialId",
        to = "super::material::Column::Id"
    )]
    Material,
}

impl Related<super::workshop::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Workshop.def()
    }
}

impl Related<super::material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Material.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
