use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-session checkout state machine: the cart, the stashed signup details
/// and the checkout-block flag that makes submission idempotent.
///
/// The primary key is the opaque browser session id, so the block flag is
/// scoped to one user's session and is not a cross-session lock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(column_type = "Json")]
    pub cart: CartLines,
    #[sea_orm(column_type = "Json", nullable)]
    pub profile_details: Option<Json>,
    pub is_blocked: bool,
    #[sea_orm(nullable)]
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// One cart entry. The price is captured at add-to-cart time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub site_id: Uuid,
    pub name: String,
    pub price: Decimal,
}

/// JSON-backed ordered cart contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct CartLines(pub Vec<CartLine>);

impl CartLines {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of line prices. Zero for an empty cart.
    pub fn total(&self) -> Decimal {
        self.0.iter().map(|line| line.price).sum()
    }
}
