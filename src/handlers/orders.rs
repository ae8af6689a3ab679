use crate::{
    auth::{AuthenticatedUser, Capability},
    entities::order::{self, ServiceKind},
    errors::ServiceError,
    services::orders::{CreateOrderInput, OrderProgress, UpdateOrderInput},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::common::{created_response, success_response};

/// Order detail as the API reports it: the stored row plus live totals and
/// readiness.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_kind: ServiceKind,
    pub items: Vec<Uuid>,
    pub payment_method_id: Uuid,
    pub discount_code_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub has_payment: bool,
    pub order_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub service_kind: ServiceKind,
    pub items: Vec<Uuid>,
    pub payment_method_id: Uuid,
    pub discount_code_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemsRequest {
    pub items: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Override for the charged amount; the order total when absent
    pub amount: Option<Decimal>,
}

async fn order_view(
    state: &AppState,
    order: order::Model,
) -> Result<OrderResponse, ServiceError> {
    let svc = &state.services.orders;
    let subtotal = svc.calculate_total(&order, false).await?;
    let total = svc.calculate_total(&order, true).await?;
    let has_payment = svc.has_payment(order.id).await?;
    let order_ready = svc.order_ready(&order).await?;

    Ok(OrderResponse {
        id: order.id,
        user_id: order.user_id,
        service_kind: order.service_kind,
        items: order.items.0,
        payment_method_id: order.payment_method_id,
        discount_code_id: order.discount_code_id,
        subtotal,
        total,
        has_payment,
        order_ready,
        created_at: order.created_at,
        updated_at: order.updated_at,
    })
}

/// Loads an order.
///
/// A missing row and a row the caller may not see produce the same NotFound.
async fn visible_order(
    state: &AppState,
    user: &AuthenticatedUser,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Resource not found".to_string()))?;
    user.require_capability(Capability::ViewOrder, order.user_id)?;
    Ok(order)
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_orders_for_user(user.id).await?;
    let mut views = Vec::with_capacity(orders.len());
    for order in orders {
        views.push(order_view(&state, order).await?);
    }
    Ok(success_response(views))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = visible_order(&state, &user, order_id).await?;
    Ok(success_response(order_view(&state, order).await?))
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .create_order(CreateOrderInput {
            user_id: user.id,
            service_kind: request.service_kind,
            items: request.items,
            payment_method_id: request.payment_method_id,
            discount_code_id: request.discount_code_id,
        })
        .await?;
    Ok(created_response(order_view(&state, order).await?))
}

pub async fn update_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<UpdateOrderInput>,
) -> Result<Response, ServiceError> {
    visible_order(&state, &user, order_id).await?;
    let order = state.services.orders.update_order(order_id, input).await?;
    Ok(success_response(order_view(&state, order).await?))
}

pub async fn add_items(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AddItemsRequest>,
) -> Result<Response, ServiceError> {
    visible_order(&state, &user, order_id).await?;
    let order = state
        .services
        .orders
        .add_items(order_id, request.items)
        .await?;
    Ok(success_response(order_view(&state, order).await?))
}

/// Fulfilment progress. Order kinds without a progress notion answer 404.
pub async fn order_progress(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderProgress>, ServiceError> {
    let order = visible_order(&state, &user, order_id).await?;
    let progress = state
        .services
        .orders
        .order_progress(&order)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Resource not found".to_string()))?;
    Ok(Json(progress))
}

pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Response, ServiceError> {
    let order = visible_order(&state, &user, order_id).await?;
    let payment = state
        .services
        .orders
        .create_payment(order.id, request.amount)
        .await?;
    let payment_url = state.services.payments.absolute_url(&payment);
    Ok(created_response(serde_json::json!({
        "payment": payment,
        "payment_url": payment_url,
    })))
}
