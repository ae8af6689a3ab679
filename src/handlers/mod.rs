pub mod carts;
pub mod checkout;
pub mod common;
pub mod discount_codes;
pub mod health;
pub mod orders;
pub mod payments;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::message_queue::SharedQueue;
use crate::services::{CheckoutService, DiscountCodeService, OrderService, PaymentService};
use crate::{db::DbPool, errors::ServiceError};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use crate::AppState;

/// Header carrying the caller's checkout session identifier. Set by the
/// storefront for cart and checkout calls.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Services layer wired into HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub discount_codes: Arc<DiscountCodeService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        queue: SharedQueue,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let discount_codes = Arc::new(DiscountCodeService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db,
            event_sender,
            queue,
            orders.clone(),
            payments.clone(),
            config,
        ));

        Self {
            orders,
            payments,
            discount_codes,
            checkout,
        }
    }
}

/// The caller's checkout session id, taken from the session header.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| SessionId(v.to_string()))
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
            .ok_or_else(|| ServiceError::BadRequest("Missing session header".to_string()))
    }
}

/// Full application router.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/cart", get(carts::get_cart))
        .route("/cart/items", post(carts::add_to_cart))
        .route("/cart/remove", post(carts::remove_from_cart))
        .route("/checkout/details", post(checkout::set_profile_details))
        .route("/checkout", post(checkout::submit_checkout))
        .route(
            "/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route(
            "/orders/:id",
            get(orders::get_order).put(orders::update_order),
        )
        .route("/orders/:id/items", post(orders::add_items))
        .route("/orders/:id/progress", get(orders::order_progress))
        .route("/orders/:id/payment", post(orders::create_payment))
        .route("/payments/report", get(payments::payment_report))
        .route("/payments/:id/:token", get(payments::get_payment))
        .route(
            "/payments/:id/success/:token",
            get(payments::payment_success),
        )
        .route(
            "/payments/:id/failure/:token",
            get(payments::payment_failure),
        )
        .route("/webhooks/payments", post(payments::payment_webhook))
        .route(
            "/discount-codes",
            get(discount_codes::list_discount_codes).post(discount_codes::create_discount_code),
        )
        .with_state(state)
}
