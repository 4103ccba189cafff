use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One undirected "alternative" edge between two materials.
///
/// Rows are stored canonically ordered (`material_a_id < material_b_id`), so
/// each symmetric pair exists exactly once.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "material_alternatives")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub material_a_id: i64,
    pub material_b_id: i64,
}

impl Model {
    /// The id on the other side of the edge, if `material_id` is part of it.
    pub fn other(&self, material_id: i64) -> Option<i64> {
        if self.material_a_id == material_id {
            Some(self.material_b_id)
        } else if self.material_b_id == material_id {
            Some(self.material_a_id)
        } else {
            None
        }
    }
}

/// Canonical (low, high) ordering for an edge.
pub fn canonical_pair(first: i64, second: i64) -> (i64, i64) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialAId",
        to = "super::material::Column::Id"
    )]
    MaterialA,
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialBId",
        to = "super::material::Column::Id"
    )]
    MaterialB,
}

impl ActiveModelBehavior for ActiveModel {}
