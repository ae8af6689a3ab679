use crate::{
    config::AppConfig,
    entities::{
        order::{self, Entity as OrderEntity},
        payment::{self, Entity as PaymentEntity, PaymentStatus},
        payment_method::Entity as PaymentMethodEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TryIntoModel,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const PAYMENT_TOKEN_LENGTH: usize = 32;

/// Random alphanumeric token shielding payment URLs from id enumeration.
pub fn generate_payment_token() -> String {
    let mut rng = rand::thread_rng();
    (0..PAYMENT_TOKEN_LENGTH)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

/// One line of what the gateway is told was purchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchasedItem {
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub price: Decimal,
    pub currency: String,
}

/// Filters for the accounting report listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentReportFilter {
    pub status: Option<PaymentStatus>,
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PaymentListPage {
    pub payments: Vec<payment::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read-mostly payment service: token lookups, gateway line items, URL
/// construction and the capture transition.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl PaymentService {
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

    /// Fetches a payment by id, requiring the matching token. A wrong token
    /// is indistinguishable from a missing payment.
    pub async fn get_by_id_and_token(
        &self,
        payment_id: Uuid,
        token: &str,
    ) -> Result<payment::Model, ServiceError> {
        PaymentEntity::find_by_id(payment_id)
            .filter(payment::Column::Token.eq(token))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<payment::Model>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::Token.eq(token))
            .one(&*self.db)
            .await?)
    }

    pub async fn order_for(&self, payment: &payment::Model) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(payment.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// At most one line item describing the whole order. Empty when the
    /// order holds no items, for gateways that reject zero-item carts.
    pub fn purchased_line_items(
        &self,
        payment: &payment::Model,
        order: &order::Model,
    ) -> Vec<PurchasedItem> {
        if order.items.is_empty() {
            return Vec::new();
        }

        vec![PurchasedItem {
            name: format!("Order #{}", order.id),
            sku: format!("order-{}-{}", order.service_kind.slug(), order.id),
            quantity: 1,
            price: payment.total,
            currency: payment.currency.clone(),
        }]
    }

    /// Persists a payment. Every save re-mirrors the gateway variant from
    /// the order's current payment method; the variant is a denormalization,
    /// not a one-time copy.
    #[instrument(skip(self, active))]
    pub async fn save(&self, mut active: payment::ActiveModel) -> Result<payment::Model, ServiceError> {
        let order_id = match &active.order_id {
            ActiveValue::Set(id) | ActiveValue::Unchanged(id) => *id,
            ActiveValue::NotSet => {
                return Err(ServiceError::InvalidOperation(
                    "Payment save requires an order".to_string(),
                ))
            }
        };

        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let method = PaymentMethodEntity::find_by_id(order.payment_method_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment method not found".to_string()))?;

        active.variant = Set(method.variant);
        active.updated_at = Set(Utc::now());
        Ok(active.save(&*self.db).await?.try_into_model()?)
    }

    /// Gateway redirect target after a successful hosted-page interaction.
    pub fn confirmation_url(&self, payment: &payment::Model) -> String {
        self.absolute(&format!(
            "/payments/{}/success/{}",
            payment.id, payment.token
        ))
    }

    /// Gateway redirect target after a failed hosted-page interaction.
    pub fn failure_url(&self, payment: &payment::Model) -> String {
        self.absolute(&format!(
            "/payments/{}/failure/{}",
            payment.id, payment.token
        ))
    }

    /// The payment's own externally reachable detail page.
    pub fn absolute_url(&self, payment: &payment::Model) -> String {
        self.absolute(&format!("/payments/{}/{}", payment.id, payment.token))
    }

    fn absolute(&self, path: &str) -> String {
        let base = self.config.site_base_url();
        match url::Url::parse(&base).and_then(|u| u.join(path)) {
            Ok(joined) => joined.to_string(),
            // The configured domain failed to parse; fall back to plain
            // concatenation rather than producing no URL at all.
            Err(_) => format!("{}{}", base, path),
        }
    }

    /// Applies an externally driven capture result. Terminal payments are
    /// returned unchanged with `transitioned = false`; callers key their
    /// side effects off that flag, which makes duplicate webhooks harmless.
    #[instrument(skip(self))]
    pub async fn mark_captured(
        &self,
        token: &str,
        status: PaymentStatus,
    ) -> Result<(payment::Model, bool), ServiceError> {
        if status == PaymentStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "Capture cannot return a payment to pending".to_string(),
            ));
        }

        let payment = self
            .find_by_token(token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        if payment.status.is_terminal() {
            info!(payment_id = %payment.id, status = ?payment.status, "Capture replay ignored");
            return Ok((payment, false));
        }

        let payment_id = payment.id;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(status);
        let payment = self.save(active).await?;

        let event = match status {
            PaymentStatus::Confirmed => Event::PaymentConfirmed(payment_id),
            _ => Event::PaymentFailed(payment_id),
        };
        self.event_sender.send_or_log(event).await;

        info!(payment_id = %payment_id, status = ?status, "Payment captured");
        Ok((payment, true))
    }

    /// Accounting report: payments filtered by status and modification date,
    /// newest first.
    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        filter: PaymentReportFilter,
        page: u64,
        per_page: u64,
    ) -> Result<PaymentListPage, ServiceError> {
        let mut query = PaymentEntity::find().order_by_desc(payment::Column::UpdatedAt);

        if let Some(status) = filter.status {
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(from) = filter.modified_from {
            query = query.filter(payment::Column::UpdatedAt.gte(from));
        }
        if let Some(to) = filter.modified_to {
            query = query.filter(payment::Column::UpdatedAt.lte(to));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(PaymentListPage {
            payments,
            total,
            page,
            per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_alphanumeric() {
        let token = generate_payment_token();
        assert_eq!(token.len(), PAYMENT_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        // Not a uniqueness proof, but catches a broken RNG hookup.
        assert_ne!(generate_payment_token(), generate_payment_token());
    }
}
