use crate::{
    auth::{AuthenticatedUser, Capability},
    errors::{ApiError, ServiceError},
    services::discount_codes::CreateDiscountCodeInput,
    AppState,
};
use axum::{extract::State, response::Response, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, map_service_error, success_response, validate_input};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDiscountCodeRequest {
    /// Defaults to the caller; staff may attribute a code to another rep
    pub sales_rep_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    pub discount: Decimal,
    pub commission: Decimal,
}

pub async fn list_discount_codes(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Response, ApiError> {
    user.require_capability(Capability::ManageDiscountCodes, user.id)?;
    let codes = state
        .services
        .discount_codes
        .list()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(codes))
}

pub async fn create_discount_code(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(request): Json<CreateDiscountCodeRequest>,
) -> Result<Response, ApiError> {
    user.require_capability(Capability::ManageDiscountCodes, user.id)?;
    validate_input(&request)?;

    let sales_rep_id = match request.sales_rep_id {
        Some(other) if other != user.id && !user.is_staff => {
            return Err(ServiceError::NotFound("Resource not found".to_string()).into());
        }
        Some(other) => other,
        None => user.id,
    };

    let code = state
        .services
        .discount_codes
        .create(CreateDiscountCodeInput {
            sales_rep_id,
            code: request.code,
            discount: request.discount,
            commission: request.commission,
        })
        .await
        .map_err(map_service_error)?;
    Ok(created_response(code))
}
