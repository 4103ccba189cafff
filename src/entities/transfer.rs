use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// Stock movement document between two workshops. Every committed line item
/// yields one transfer-out movement at the source and one transfer-in
/// movement at the target, both carrying this document as origin.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub source_workshop_id: i64,
    pub target_workshop_id: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::workshop::Entity",
        from = "Column::SourceWorkshopId",
        to = "super::workshop::Column::Id"
    )]
    SourceWorkshop,
    #[sea_orm(
        belongs_to = "super::workshop::Entity",
        from = "Column::TargetWorkshopId",
        to = "super::workshop::Column::Id"
    )]
    TargetWorkshop,
    #[sea_orm(has_many = "super::transfer_item::Entity")]
    Items,
}

impl Related<super::transfer_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
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
