use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sales-attribution code granting a percentage discount to the buyer and a
/// commission percentage to the representative.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discount_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sales_rep_id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    /// Discount percentage in [0, 100]
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub discount: Decimal,
    /// Commission percentage in [0, 100]
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub commission: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
