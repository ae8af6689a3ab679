use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{common::success_response, SessionId};

#[derive(Debug, Deserialize)]
pub struct CartQuery {
    pub site: Option<Uuid>,
}

impl CartQuery {
    fn site(&self) -> Result<Uuid, ServiceError> {
        self.site
            .ok_or_else(|| ServiceError::BadRequest("Missing site parameter".to_string()))
    }
}

pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    session: SessionId,
) -> Result<Response, ServiceError> {
    let cart = state.services.checkout.cart(&session.0).await?;
    Ok(success_response(cart))
}

pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    Query(query): Query<CartQuery>,
) -> Result<Response, ServiceError> {
    let site_id = query.site()?;
    let cart = state
        .services
        .checkout
        .add_to_cart(&session.0, site_id)
        .await?;
    Ok(success_response(cart))
}

pub async fn remove_from_cart(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    Query(query): Query<CartQuery>,
) -> Result<Response, ServiceError> {
    let site_id = query.site()?;
    let cart = state
        .services
        .checkout
        .remove_from_cart(&session.0, site_id)
        .await?;
    Ok(success_response(cart))
}
