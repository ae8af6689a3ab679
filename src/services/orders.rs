use crate::{
    catalog::{self, CatalogItem},
    config::AppConfig,
    entities::{
        order::{self, Entity as OrderEntity, ItemIds, ServiceKind},
        payment::{self, Entity as PaymentEntity, PaymentStatus},
        payment_method::Entity as PaymentMethodEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::generate_payment_token,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Input for creating an order at checkout time.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    pub service_kind: ServiceKind,
    pub items: Vec<Uuid>,
    pub payment_method_id: Uuid,
    pub discount_code_id: Option<Uuid>,
}

/// Input for the order-edit flow. Disallowed once a payment exists.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOrderInput {
    pub payment_method_id: Option<Uuid>,
    pub discount_code_id: Option<Option<Uuid>>,
}

/// Progress snapshot for a SocialProfiles order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProgress {
    pub created: u64,
    pub total: u64,
    pub progress: String,
}

impl OrderProgress {
    fn empty() -> Self {
        Self {
            created: 0,
            total: 0,
            progress: "0%".to_string(),
        }
    }
}

/// Service for orders: item management, totals, readiness and the
/// payment-creation boundary.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Creates an order with its initial item list.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<order::Model, ServiceError> {
        self.check_items_resolve(input.service_kind, &input.items)
            .await?;

        let order = self.insert_order(&*self.db, input).await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;

        info!(order_id = %order.id, "Order created");
        Ok(order)
    }

    /// Writes the order row on `conn`, which may be a transaction. Items are
    /// taken as given; callers that accept outside ids resolve them first.
    pub(crate) async fn insert_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: CreateOrderInput,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(input.user_id),
            service_kind: Set(input.service_kind),
            items: Set(ItemIds(input.items)),
            payment_method_id: Set(input.payment_method_id),
            discount_code_id: Set(input.discount_code_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(order.insert(conn).await?)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    pub async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await?)
    }

    /// Appends item ids to the order. No deduplication; order of addition is
    /// preserved. Orders with a payment are immutable.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn add_items(
        &self,
        order_id: Uuid,
        item_ids: Vec<Uuid>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.require_order(order_id).await?;

        if self.has_payment(order_id).await? {
            return Err(ServiceError::Conflict(
                "Order already has a payment and can no longer change".to_string(),
            ));
        }

        self.check_items_resolve(order.service_kind, &item_ids)
            .await?;

        let mut items = order.items.0.clone();
        items.extend(item_ids);

        let mut active: order::ActiveModel = order.into();
        active.items = Set(ItemIds(items));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Resolves the order's stored item ids against the live catalog.
    /// Prices reflect the catalog's current state until a payment fixes them.
    pub async fn items(&self, order: &order::Model) -> Result<Vec<CatalogItem>, ServiceError> {
        catalog::for_kind(order.service_kind)
            .resolve_items(&self.db, &order.items.0)
            .await
    }

    /// Discount percentage: zero without a code, else the code's value.
    pub async fn discount(&self, order: &order::Model) -> Result<Decimal, ServiceError> {
        let Some(code_id) = order.discount_code_id else {
            return Ok(Decimal::ZERO);
        };

        let code = crate::entities::discount_code::Entity::find_by_id(code_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Discount code not found".to_string()))?;

        Ok(code.discount)
    }

    /// Sums live item prices, optionally applying the attached discount, and
    /// rounds to two decimal places. An empty item set totals 0.00.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn calculate_total(
        &self,
        order: &order::Model,
        include_discount: bool,
    ) -> Result<Decimal, ServiceError> {
        let items = self.items(order).await?;
        if items.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let total: Decimal = items.iter().map(|item| item.price).sum();

        let discount = if include_discount {
            self.discount(order).await?
        } else {
            Decimal::ZERO
        };

        Ok(apply_discount(total, discount))
    }

    /// A SocialProfiles order is ready when every item reached a terminal
    /// state. Readiness is not modeled for ReputationCase orders and is
    /// always false for them.
    pub async fn order_ready(&self, order: &order::Model) -> Result<bool, ServiceError> {
        if order.service_kind != ServiceKind::SocialProfiles {
            return Ok(false);
        }

        let items = self.items(order).await?;
        Ok(items.iter().all(|item| item.status.is_terminal()))
    }

    /// Progress of a SocialProfiles order; `None` for the other kind.
    /// An order with no items reports `{0, 0, "0%"}`.
    pub async fn order_progress(
        &self,
        order: &order::Model,
    ) -> Result<Option<OrderProgress>, ServiceError> {
        if order.service_kind != ServiceKind::SocialProfiles {
            return Ok(None);
        }

        let items = self.items(order).await?;
        let total = items.len() as u64;
        if total == 0 {
            return Ok(Some(OrderProgress::empty()));
        }

        let created = items.iter().filter(|item| item.status.is_terminal()).count() as u64;
        let percent = created * 100 / total;

        Ok(Some(OrderProgress {
            created,
            total,
            progress: format!("{}%", percent),
        }))
    }

    pub async fn has_payment(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?
            .is_some())
    }

    /// Creates the order's payment. At most one payment may ever exist per
    /// order: checked here, and backed by the unique index on
    /// `payments.order_id` for concurrent callers.
    ///
    /// Total is `amount` when given, else the discount-aware computed total;
    /// either way it is frozen on the payment from here on.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_payment(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<payment::Model, ServiceError> {
        let order = self.require_order(order_id).await?;

        let total = match amount {
            Some(amount) => amount.round_dp(2),
            None => self.calculate_total(&order, true).await?,
        };

        let payment = self.insert_payment(&*self.db, &order, total).await?;

        self.event_sender
            .send_or_log(Event::PaymentCreated {
                order_id,
                payment_id: payment.id,
            })
            .await;

        info!(payment_id = %payment.id, order_id = %order_id, total = %total, "Payment created");
        Ok(payment)
    }

    /// Writes the payment row on `conn`, which may be a transaction.
    pub(crate) async fn insert_payment<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
        total: Decimal,
    ) -> Result<payment::Model, ServiceError> {
        let existing = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(conn)
            .await?;
        if existing.is_some() {
            warn!(order_id = %order.id, "Refusing second payment for order");
            return Err(ServiceError::Conflict(
                "Order already has a payment".to_string(),
            ));
        }

        let method = PaymentMethodEntity::find_by_id(order.payment_method_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment method not found".to_string()))?;

        let now = Utc::now();

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            token: Set(generate_payment_token()),
            order_id: Set(order.id),
            total: Set(total),
            currency: Set(self.config.currency.clone()),
            status: Set(PaymentStatus::Pending),
            variant: Set(method.variant),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The unique index is the last line of defense against a concurrent
        // create racing past the exists-check above.
        payment.insert(conn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict("Order already has a payment".to_string())
            } else {
                error!(error = %e, order_id = %order.id, "Failed to create payment");
                ServiceError::DatabaseError(e)
            }
        })
    }

    /// Order-edit flow. Orders with a payment can no longer be edited.
    #[instrument(skip(self, input), fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        input: UpdateOrderInput,
    ) -> Result<order::Model, ServiceError> {
        let order = self.require_order(order_id).await?;

        if self.has_payment(order_id).await? {
            return Err(ServiceError::Conflict(
                "Order already has a payment and can no longer change".to_string(),
            ));
        }

        let mut active: order::ActiveModel = order.into();
        if let Some(method_id) = input.payment_method_id {
            active.payment_method_id = Set(method_id);
        }
        if let Some(code_id) = input.discount_code_id {
            active.discount_code_id = Set(code_id);
        }
        active.updated_at = Set(Utc::now());

        let order = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderUpdated(order_id))
            .await;

        Ok(order)
    }

    async fn require_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Every stored id must resolve to an item of the kind the order implies.
    async fn check_items_resolve(
        &self,
        kind: ServiceKind,
        item_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        if item_ids.is_empty() {
            return Ok(());
        }

        let resolved = catalog::for_kind(kind)
            .resolve_items(&self.db, item_ids)
            .await?;

        if resolved.len() != item_ids.len() {
            return Err(ServiceError::ValidationError(format!(
                "{} of {} items do not resolve to {} catalog entries",
                item_ids.len() - resolved.len(),
                item_ids.len(),
                kind.slug()
            )));
        }

        Ok(())
    }
}

/// Applies a percentage discount to a total and rounds to cents. The
/// discounted total always equals `round(total * (1 - d/100), 2)`.
pub fn apply_discount(total: Decimal, discount: Decimal) -> Decimal {
    let total = if discount.is_zero() {
        total
    } else {
        total * (Decimal::ONE - discount / Decimal::ONE_HUNDRED)
    };
    total.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discounts_round_to_cents() {
        assert_eq!(apply_discount(dec!(9.99), dec!(33)), dec!(6.69));
        assert_eq!(apply_discount(dec!(25.50), dec!(10)), dec!(22.95));
    }

    #[test]
    fn zero_and_full_discounts_are_the_edges() {
        assert_eq!(apply_discount(dec!(12.34), Decimal::ZERO), dec!(12.34));
        assert_eq!(
            apply_discount(dec!(12.34), Decimal::ONE_HUNDRED),
            Decimal::ZERO.round_dp(2)
        );
    }
}
