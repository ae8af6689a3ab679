//! Catalog collaborator: the source of purchasable item records.
//!
//! The two item kinds live behind one trait; an order selects its variant
//! once at construction time instead of branching on a kind flag in every
//! operation.

use crate::{
    entities::{
        item_status::ItemStatus,
        order::ServiceKind,
        reputation_case, site, social_profile,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use uuid::Uuid;

/// Live view of one catalog item: whatever an order needs to price itself
/// and report progress.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub price: Decimal,
    pub status: ItemStatus,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Resolves ids against the live catalog, preserving input order and
    /// multiplicity. Ids that no longer resolve are skipped.
    async fn resolve_items(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
    ) -> Result<Vec<CatalogItem>, ServiceError>;

    /// Transitions every listed item currently in `from` to `to`, returning
    /// the ids that actually transitioned. Items already past `from` are left
    /// alone, which is what makes the post-payment hooks idempotent.
    async fn update_status(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<Vec<Uuid>, ServiceError>;
}

/// Selects the catalog variant for a service kind.
pub fn for_kind(kind: ServiceKind) -> &'static dyn Catalog {
    match kind {
        ServiceKind::SocialProfiles => &SocialProfilesCatalog,
        ServiceKind::ReputationCase => &ReputationCaseCatalog,
    }
}

/// Social profiles are priced through their site listing.
pub struct SocialProfilesCatalog;

#[async_trait]
impl Catalog for SocialProfilesCatalog {
    fn kind(&self) -> ServiceKind {
        ServiceKind::SocialProfiles
    }

    async fn resolve_items(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
    ) -> Result<Vec<CatalogItem>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = social_profile::Entity::find()
            .filter(social_profile::Column::Id.is_in(ids.to_vec()))
            .all(db)
            .await?;

        let site_ids: Vec<Uuid> = profiles.iter().map(|p| p.site_id).collect();
        let prices: HashMap<Uuid, Decimal> = site::Entity::find()
            .filter(site::Column::Id.is_in(site_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|s| (s.id, s.price))
            .collect();

        let by_id: HashMap<Uuid, &social_profile::Model> =
            profiles.iter().map(|p| (p.id, p)).collect();

        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|profile| CatalogItem {
                id: profile.id,
                price: prices.get(&profile.site_id).copied().unwrap_or(Decimal::ZERO),
                status: profile.status,
            })
            .collect())
    }

    async fn update_status(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<Vec<Uuid>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let matching: Vec<Uuid> = social_profile::Entity::find()
            .filter(social_profile::Column::Id.is_in(ids.to_vec()))
            .filter(social_profile::Column::Status.eq(from))
            .all(db)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        if matching.is_empty() {
            return Ok(Vec::new());
        }

        social_profile::Entity::update_many()
            .col_expr(social_profile::Column::Status, Expr::value(to))
            .col_expr(
                social_profile::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(social_profile::Column::Id.is_in(matching.clone()))
            .filter(social_profile::Column::Status.eq(from))
            .exec(db)
            .await?;

        Ok(matching)
    }
}

/// Reputation cases carry their own price.
pub struct ReputationCaseCatalog;

#[async_trait]
impl Catalog for ReputationCaseCatalog {
    fn kind(&self) -> ServiceKind {
        ServiceKind::ReputationCase
    }

    async fn resolve_items(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
    ) -> Result<Vec<CatalogItem>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let cases = reputation_case::Entity::find()
            .filter(reputation_case::Column::Id.is_in(ids.to_vec()))
            .all(db)
            .await?;

        let by_id: HashMap<Uuid, &reputation_case::Model> =
            cases.iter().map(|c| (c.id, c)).collect();

        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|case| CatalogItem {
                id: case.id,
                price: case.price,
                status: case.status,
            })
            .collect())
    }

    async fn update_status(
        &self,
        db: &DatabaseConnection,
        ids: &[Uuid],
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<Vec<Uuid>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let matching: Vec<Uuid> = reputation_case::Entity::find()
            .filter(reputation_case::Column::Id.is_in(ids.to_vec()))
            .filter(reputation_case::Column::Status.eq(from))
            .all(db)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if matching.is_empty() {
            return Ok(Vec::new());
        }

        reputation_case::Entity::update_many()
            .col_expr(reputation_case::Column::Status, Expr::value(to))
            .col_expr(
                reputation_case::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(reputation_case::Column::Id.is_in(matching.clone()))
            .filter(reputation_case::Column::Status.eq(from))
            .exec(db)
            .await?;

        Ok(matching)
    }
}
