use crate::{
    catalog,
    config::AppConfig,
    entities::{
        checkout_session::{self, CartLine, CartLines, Entity as CheckoutSessionEntity},
        item_status::ItemStatus,
        mailbox::{self, Entity as MailboxEntity},
        order::ServiceKind,
        payment,
        site::Entity as SiteEntity,
        social_profile,
        user::{self, Entity as UserEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    message_queue::SharedQueue,
    services::{orders::CreateOrderInput, OrderService, PaymentService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Cart snapshot returned by the cart endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Decimal,
    pub message: String,
}

/// Checkout form data submitted with the final step.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitCheckoutInput {
    pub payment_method_id: Uuid,
    pub discount_code_id: Option<Uuid>,
}

/// Result of a checkout submission. Duplicate submissions land on the URL
/// the first one produced.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub payment_url: String,
    /// False when this submission was absorbed by the block flag
    pub created: bool,
}

/// Session-scoped coordinator turning a cart into an order + payment pair
/// exactly once.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    queue: SharedQueue,
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    #[allow(dead_code)]
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        queue: SharedQueue,
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            queue,
            orders,
            payments,
            config,
        }
    }

    /// Adds a site to the session cart at the site's current price.
    #[instrument(skip(self), fields(session_id = %session_id, site_id = %site_id))]
    pub async fn add_to_cart(
        &self,
        session_id: &str,
        site_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let site = SiteEntity::find_by_id(site_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Site {} not found", site_id)))?;

        let session = self.get_or_create_session(session_id).await?;

        let mut lines = session.cart.0.clone();
        lines.push(CartLine {
            site_id: site.id,
            name: site.name.clone(),
            price: site.price,
        });
        let cart = CartLines(lines);
        let total = cart.total();

        let mut active: checkout_session::ActiveModel = session.into();
        active.cart = Set(cart.clone());
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        Ok(CartView {
            lines: cart.0,
            total,
            message: format!("{} has been added to the cart.", site.name),
        })
    }

    /// Removes one matching line from the session cart.
    #[instrument(skip(self), fields(session_id = %session_id, site_id = %site_id))]
    pub async fn remove_from_cart(
        &self,
        session_id: &str,
        site_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let site = SiteEntity::find_by_id(site_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Site {} not found", site_id)))?;

        let session = self.get_or_create_session(session_id).await?;

        let mut lines = session.cart.0.clone();
        if let Some(pos) = lines.iter().position(|line| line.site_id == site_id) {
            lines.remove(pos);
        }
        let cart = CartLines(lines);
        let total = cart.total();

        let mut active: checkout_session::ActiveModel = session.into();
        active.cart = Set(cart.clone());
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        Ok(CartView {
            lines: cart.0,
            total,
            message: format!("{} has been removed from the cart.", site.name),
        })
    }

    pub async fn cart(&self, session_id: &str) -> Result<CartView, ServiceError> {
        let session = self.get_or_create_session(session_id).await?;
        let total = session.cart.total();
        Ok(CartView {
            lines: session.cart.0,
            total,
            message: String::new(),
        })
    }

    /// Stashes the signup form in the session. Nothing durable is created
    /// yet, so an abandoned checkout leaves no orphaned records.
    #[instrument(skip(self, details), fields(session_id = %session_id))]
    pub async fn set_profile_details(
        &self,
        session_id: &str,
        details: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let session = self.get_or_create_session(session_id).await?;
        let mut active: checkout_session::ActiveModel = session.into();
        active.profile_details = Set(Some(details));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Submits the checkout. At most one order and one payment are created
    /// per session, even under rapid-fire duplicate submissions: the block
    /// flag is claimed with a compare-and-swap before anything durable is
    /// written, and a blocked session short-circuits to the remembered
    /// payment URL.
    #[instrument(skip(self, input), fields(session_id = %session_id, user_id = %actor_id))]
    pub async fn submit(
        &self,
        session_id: &str,
        actor_id: Uuid,
        input: SubmitCheckoutInput,
    ) -> Result<SubmitOutcome, ServiceError> {
        let session = self.get_or_create_session(session_id).await?;

        if !self.claim_block(session_id).await? {
            // Another submission won the claim. Send the caller where the
            // winner's payment lives, once it is known.
            let session = self.require_session(session_id).await?;
            return match session.payment_url {
                Some(url) => {
                    info!(session_id, "Duplicate checkout absorbed");
                    Ok(SubmitOutcome {
                        payment_url: url,
                        created: false,
                    })
                }
                None => Err(ServiceError::Conflict(
                    "Checkout already in progress".to_string(),
                )),
            };
        }

        match self.materialize(session_id, &session, actor_id, input).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // The attempt died before producing a payment; unblock the
                // session so the user can retry with the same cart.
                self.release_block(session_id).await?;
                Err(e)
            }
        }
    }

    /// Runs every durable write of a submission inside one transaction, so a
    /// mid-flight failure (bad payment method, db error) rolls back the
    /// mailbox claim, the profiles and the order together.
    async fn materialize(
        &self,
        session_id: &str,
        session: &checkout_session::Model,
        actor_id: Uuid,
        input: SubmitCheckoutInput,
    ) -> Result<SubmitOutcome, ServiceError> {
        if session.cart.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        let details = session.profile_details.clone().ok_or_else(|| {
            ServiceError::ValidationError("Profile details missing".to_string())
        })?;

        let txn = self.db.begin().await?;

        let mailbox = self.claim_mailbox(&txn, actor_id).await?;

        // Materialize one profile per cart line, awaiting paid confirmation.
        let username_base = details
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("profile")
            .to_string();

        let now = Utc::now();
        let mut item_ids = Vec::with_capacity(session.cart.len());
        for line in &session.cart.0 {
            let profile_id = Uuid::new_v4();
            let suffix = &profile_id.simple().to_string()[..8];
            let profile = social_profile::ActiveModel {
                id: Set(profile_id),
                user_id: Set(actor_id),
                site_id: Set(line.site_id),
                username: Set(format!("{}-{}", username_base, suffix)),
                mailbox_id: Set(mailbox.id),
                status: Set(ItemStatus::AwaitingPaidConfirmation),
                profile: Set(Some(details.clone())),
                created_at: Set(now),
                updated_at: Set(now),
            };
            profile.insert(&txn).await?;
            item_ids.push(profile_id);
        }

        // The items were written in this same transaction, so they resolve
        // by construction; the catalog check would not see them anyway.
        let order = self
            .orders
            .insert_order(
                &txn,
                CreateOrderInput {
                    user_id: actor_id,
                    service_kind: ServiceKind::SocialProfiles,
                    items: item_ids,
                    payment_method_id: input.payment_method_id,
                    discount_code_id: input.discount_code_id,
                },
            )
            .await?;

        // The payment is charged the cart's total, not a recomputed one.
        let payment = self
            .orders
            .insert_payment(&txn, &order, session.cart.total())
            .await?;

        let payment_url = self.payments.absolute_url(&payment);
        self.remember_payment_url(&txn, session_id, &payment_url)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        self.event_sender
            .send_or_log(Event::PaymentCreated {
                order_id: order.id,
                payment_id: payment.id,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutSubmitted {
                session_id: session_id.to_string(),
                order_id: order.id,
            })
            .await;

        info!(session_id, order_id = %order.id, payment_id = %payment.id, "Checkout submitted");
        Ok(SubmitOutcome {
            payment_url,
            created: true,
        })
    }

    /// Post-payment hook for a confirmed capture. Idempotent: only items
    /// still awaiting paid confirmation transition, and only those ids are
    /// dispatched, so a duplicate webhook dispatches nothing.
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    pub async fn payment_confirmed(
        &self,
        payment: &payment::Model,
        session_id: Option<&str>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let order = self.payments.order_for(payment).await?;

        let transitioned = catalog::for_kind(order.service_kind)
            .update_status(
                &self.db,
                &order.items.0,
                ItemStatus::AwaitingPaidConfirmation,
                ItemStatus::PaidRequested,
            )
            .await?;

        if order.service_kind == ServiceKind::SocialProfiles {
            for item_id in &transitioned {
                // Fire-and-forget; a dispatch failure is logged, not fatal.
                if let Err(e) = self.queue.submit(*item_id).await {
                    warn!(item_id = %item_id, "Provisioning dispatch failed: {}", e);
                } else {
                    self.event_sender
                        .send_or_log(Event::ProfileProvisioningQueued(*item_id))
                        .await;
                }
            }

            self.mark_user_ordered(order.user_id).await?;
        }

        if let Some(session_id) = session_id {
            self.clear_session(session_id).await?;
        }

        info!(order_id = %order.id, dispatched = transitioned.len(), "Payment confirmation processed");
        Ok(transitioned)
    }

    /// Post-payment hook for a failed capture: the block flag is released so
    /// the user can retry, and the cart is kept intact.
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    pub async fn payment_failed(
        &self,
        payment: &payment::Model,
        session_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(session_id) = session_id {
            self.release_block(session_id).await?;
        }
        info!(payment_id = %payment.id, "Payment failure processed");
        Ok(())
    }

    async fn get_or_create_session(
        &self,
        session_id: &str,
    ) -> Result<checkout_session::Model, ServiceError> {
        if let Some(session) = CheckoutSessionEntity::find_by_id(session_id)
            .one(&*self.db)
            .await?
        {
            return Ok(session);
        }

        let now = Utc::now();
        let session = checkout_session::ActiveModel {
            id: Set(session_id.to_string()),
            cart: Set(CartLines::default()),
            profile_details: Set(None),
            is_blocked: Set(false),
            payment_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match session.insert(&*self.db).await {
            Ok(session) => Ok(session),
            // A concurrent request created the row first; use theirs.
            Err(e)
                if matches!(
                    e.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) =>
            {
                self.require_session(session_id).await
            }
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }

    async fn require_session(
        &self,
        session_id: &str,
    ) -> Result<checkout_session::Model, ServiceError> {
        CheckoutSessionEntity::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Checkout session not found".to_string()))
    }

    /// Compare-and-swap on the session block flag. True when this caller won
    /// the claim.
    async fn claim_block(&self, session_id: &str) -> Result<bool, ServiceError> {
        let result = CheckoutSessionEntity::update_many()
            .col_expr(checkout_session::Column::IsBlocked, Expr::value(true))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::IsBlocked.eq(false))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn release_block(&self, session_id: &str) -> Result<(), ServiceError> {
        CheckoutSessionEntity::update_many()
            .col_expr(checkout_session::Column::IsBlocked, Expr::value(false))
            .col_expr(
                checkout_session::Column::PaymentUrl,
                Expr::value(Option::<String>::None),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn remember_payment_url<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: &str,
        payment_url: &str,
    ) -> Result<(), ServiceError> {
        CheckoutSessionEntity::update_many()
            .col_expr(
                checkout_session::Column::PaymentUrl,
                Expr::value(Some(payment_url.to_string())),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Returns the session to its empty state after a confirmed payment.
    async fn clear_session(&self, session_id: &str) -> Result<(), ServiceError> {
        if let Some(session) = CheckoutSessionEntity::find_by_id(session_id)
            .one(&*self.db)
            .await?
        {
            let mut active: checkout_session::ActiveModel = session.into();
            active.cart = Set(CartLines::default());
            active.profile_details = Set(None);
            active.is_blocked = Set(false);
            active.payment_url = Set(None);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
        }
        Ok(())
    }

    /// Claims the oldest unassigned mailbox from the pool. An empty pool
    /// fails the checkout loudly; proceeding without a mailbox is never an
    /// option.
    async fn claim_mailbox<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<mailbox::Model, ServiceError> {
        loop {
            let mailbox = MailboxEntity::find()
                .filter(mailbox::Column::UserId.is_null())
                .order_by_asc(mailbox::Column::CreatedAt)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::CatalogExhausted(
                        "No pre-provisioned mailbox available".to_string(),
                    )
                })?;

            // Conditional assignment so two concurrent checkouts cannot claim
            // the same mailbox; losing the race moves on to the next oldest.
            let claimed = MailboxEntity::update_many()
                .col_expr(mailbox::Column::UserId, Expr::value(Some(user_id)))
                .filter(mailbox::Column::Id.eq(mailbox.id))
                .filter(mailbox::Column::UserId.is_null())
                .exec(conn)
                .await?;

            if claimed.rows_affected > 0 {
                return Ok(mailbox::Model {
                    user_id: Some(user_id),
                    ..mailbox
                });
            }
        }
    }

    /// Sets the user-progress flag once; later confirmations leave it alone.
    async fn mark_user_ordered(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let Some(user) = UserEntity::find_by_id(user_id).one(&*self.db).await? else {
            return Ok(());
        };

        if !user.made_an_order {
            let mut active: user::ActiveModel = user.into();
            active.made_an_order = Set(true);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
        }
        Ok(())
    }
}
