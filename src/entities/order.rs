use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity: one checkout transaction grouping purchased items, a payment
/// method and an optional discount code.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_kind: ServiceKind,
    /// Catalog item ids, order of addition preserved, duplicates allowed
    #[sea_orm(column_type = "Json")]
    pub items: ItemIds,
    pub payment_method_id: Uuid,
    #[sea_orm(nullable)]
    pub discount_code_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::payment_method::Entity",
        from = "Column::PaymentMethodId",
        to = "super::payment_method::Column::Id"
    )]
    PaymentMethod,
    #[sea_orm(
        belongs_to = "super::discount_code::Entity",
        from = "Column::DiscountCodeId",
        to = "super::discount_code::Column::Id"
    )]
    DiscountCode,
    #[sea_orm(has_one = "super::payment::Entity")]
    Payment,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::payment_method::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentMethod.def()
    }
}

impl Related<super::discount_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscountCode.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// The two service kinds an order can be placed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    #[sea_orm(string_value = "social-profiles")]
    SocialProfiles,
    #[sea_orm(string_value = "reputation-case")]
    ReputationCase,
}

impl ServiceKind {
    pub fn label(self) -> &'static str {
        match self {
            ServiceKind::SocialProfiles => "Social Profiles",
            ServiceKind::ReputationCase => "Reputation Case",
        }
    }

    /// Lowercased, dash-separated label, used in payment line-item SKUs.
    pub fn slug(self) -> &'static str {
        match self {
            ServiceKind::SocialProfiles => "social-profiles",
            ServiceKind::ReputationCase => "reputation-case",
        }
    }
}

/// JSON-backed ordered list of catalog item ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ItemIds(pub Vec<Uuid>);

impl ItemIds {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercased_dashed_label() {
        assert_eq!(ServiceKind::SocialProfiles.slug(), "social-profiles");
        assert_eq!(ServiceKind::ReputationCase.slug(), "reputation-case");
        for kind in [ServiceKind::SocialProfiles, ServiceKind::ReputationCase] {
            assert_eq!(kind.slug(), kind.label().to_lowercase().replace(' ', "-"));
        }
    }
}
