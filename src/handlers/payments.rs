use crate::{
    auth::{AuthenticatedUser, Capability},
    entities::payment::{self, PaymentStatus},
    errors::ServiceError,
    gateway::{CaptureOutcome, RedirectUrls, WebhookNotification},
    services::payments::{PaymentReportFilter, PurchasedItem},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    common::{success_response, PaginationParams},
    SessionId,
};

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub payment: payment::Model,
    pub order_user_id: Uuid,
    pub purchased_items: Vec<PurchasedItem>,
    /// Hosted gateway page, present while the payment is still capturable
    pub pay_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentReportQuery {
    pub status: Option<PaymentStatus>,
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Payment detail. The token must match, and the caller must own the order
/// (or be staff). Anonymous callers and strangers holding a leaked URL both
/// read not-found, so the page gives away nothing.
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: Option<AuthenticatedUser>,
    Path((payment_id, token)): Path<(Uuid, String)>,
) -> Result<Response, ServiceError> {
    let user = user.ok_or_else(|| ServiceError::NotFound("Resource not found".to_string()))?;

    let payment = state
        .services
        .payments
        .get_by_id_and_token(payment_id, &token)
        .await?;
    let order = state.services.payments.order_for(&payment).await?;
    user.require_capability(Capability::ViewPayment, order.user_id)?;
    let purchased_items = state.services.payments.purchased_line_items(&payment, &order);

    let pay_url = if payment.status == PaymentStatus::Pending {
        let urls = RedirectUrls {
            confirmation: state.services.payments.confirmation_url(&payment),
            failure: state.services.payments.failure_url(&payment),
        };
        match state.gateway.begin_capture(&payment, &urls).await? {
            CaptureOutcome::Redirect(url) => Some(url),
            CaptureOutcome::Completed(_) => None,
        }
    } else {
        None
    };

    Ok(success_response(PaymentResponse {
        payment,
        order_user_id: order.user_id,
        purchased_items,
        pay_url,
    }))
}

/// Gateway return target for a successful capture. Safe to land on twice:
/// the capture transition and the fulfilment dispatch are both idempotent.
pub async fn payment_success(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path((payment_id, token)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let session = SessionId::from_headers(&headers);
    let payment = capture(
        &state,
        Some(&user),
        payment_id,
        &token,
        PaymentStatus::Confirmed,
        session,
    )
    .await?;
    Ok(success_response(serde_json::json!({
        "status": payment.status,
        "payment_id": payment.id,
    })))
}

/// Gateway return target for a failed capture. The checkout session keeps
/// its cart so the user can retry.
pub async fn payment_failure(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path((payment_id, token)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let session = SessionId::from_headers(&headers);
    let payment = capture(
        &state,
        Some(&user),
        payment_id,
        &token,
        PaymentStatus::Failed,
        session,
    )
    .await?;
    Ok(success_response(serde_json::json!({
        "status": payment.status,
        "payment_id": payment.id,
    })))
}

/// Server-to-server capture notification. No session context here; duplicate
/// notifications transition nothing and dispatch nothing.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WebhookNotification>,
) -> Result<Response, ServiceError> {
    let payment = state
        .services
        .payments
        .find_by_token(&request.payment_token)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

    let payment = capture(&state, None, payment.id, &payment.token, request.status, None).await?;
    Ok(success_response(serde_json::json!({
        "status": payment.status,
        "payment_id": payment.id,
    })))
}

/// Accounting report over payments, staff only.
pub async fn payment_report(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<PaymentReportQuery>,
) -> Result<Response, ServiceError> {
    if !user.is_staff {
        return Err(ServiceError::NotFound("Resource not found".to_string()));
    }

    let defaults = PaginationParams::default();
    let page = state
        .services
        .payments
        .list_payments(
            PaymentReportFilter {
                status: query.status,
                modified_from: query.modified_from,
                modified_to: query.modified_to,
            },
            query.page.unwrap_or(defaults.page),
            query.per_page.unwrap_or(defaults.per_page),
        )
        .await?;
    Ok(success_response(page))
}

/// Shared capture path for callbacks and webhooks: flips the payment status,
/// then runs the post-payment coordinator hook only when this call actually
/// made the transition. Browser landings carry a user that must own the
/// order; the server-to-server webhook has no user and the token alone
/// authenticates it.
async fn capture(
    state: &AppState,
    user: Option<&AuthenticatedUser>,
    payment_id: Uuid,
    token: &str,
    status: PaymentStatus,
    session: Option<SessionId>,
) -> Result<payment::Model, ServiceError> {
    // Token and ownership checks happen before any state change.
    let payment = state
        .services
        .payments
        .get_by_id_and_token(payment_id, token)
        .await?;
    if let Some(user) = user {
        let order = state.services.payments.order_for(&payment).await?;
        user.require_capability(Capability::ViewPayment, order.user_id)?;
    }

    let (payment, transitioned) = state.services.payments.mark_captured(token, status).await?;
    let session_id = session.as_ref().map(|s| s.0.as_str());

    if transitioned {
        match payment.status {
            PaymentStatus::Confirmed => {
                state
                    .services
                    .checkout
                    .payment_confirmed(&payment, session_id)
                    .await?;
            }
            PaymentStatus::Failed => {
                state
                    .services
                    .checkout
                    .payment_failed(&payment, session_id)
                    .await?;
            }
            PaymentStatus::Pending | PaymentStatus::Refunded => {}
        }
    }

    Ok(payment)
}
