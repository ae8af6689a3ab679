//! Permission collaborator.
//!
//! Authentication itself happens upstream; requests arrive with an
//! `x-user-id` header injected by the edge. This module resolves that header
//! to a user row and answers capability questions. A failed capability check
//! is reported as NotFound so entity existence never leaks to outsiders.

use crate::{entities::user, errors::ServiceError, AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::EntityTrait;
use std::sync::Arc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Capabilities the accounting slice consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewOrder,
    ViewPayment,
    ManageDiscountCodes,
}

/// The resolved caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub is_staff: bool,
    pub is_sales_rep: bool,
}

impl AuthenticatedUser {
    /// "Does this actor have this capability on an entity owned by
    /// `owner_id`?"
    pub fn has_capability(&self, capability: Capability, owner_id: Uuid) -> bool {
        match capability {
            Capability::ViewOrder | Capability::ViewPayment => {
                self.is_staff || self.id == owner_id
            }
            Capability::ManageDiscountCodes => self.is_staff || self.is_sales_rep,
        }
    }

    /// Capability gate that masks authorization failures as NotFound.
    pub fn require_capability(
        &self,
        capability: Capability,
        owner_id: Uuid,
    ) -> Result<(), ServiceError> {
        if self.has_capability(capability, owner_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Resource not found".to_string()))
        }
    }
}

impl From<user::Model> for AuthenticatedUser {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            is_staff: model.is_staff,
            is_sales_rep: model.is_sales_rep,
        }
    }
}

#[async_trait::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing user header".to_string()))?;

        let user_id = Uuid::parse_str(header)
            .map_err(|_| ServiceError::Unauthorized("Malformed user header".to_string()))?;

        let user = user::Entity::find_by_id(user_id)
            .one(&*state.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Unknown user".to_string()))?;

        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(is_staff: bool, is_sales_rep: bool) -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            email: "actor@example.com".into(),
            is_staff,
            is_sales_rep,
        }
    }

    #[test]
    fn owners_and_staff_can_view_orders() {
        let user = actor(false, false);
        assert!(user.has_capability(Capability::ViewOrder, user.id));
        assert!(!user.has_capability(Capability::ViewOrder, Uuid::new_v4()));
        assert!(actor(true, false).has_capability(Capability::ViewOrder, Uuid::new_v4()));
    }

    #[test]
    fn capability_miss_is_not_found_not_forbidden() {
        let err = actor(false, false)
            .require_capability(Capability::ViewPayment, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn sales_reps_manage_discount_codes() {
        assert!(actor(false, true).has_capability(Capability::ManageDiscountCodes, Uuid::new_v4()));
        assert!(!actor(false, false).has_capability(Capability::ManageDiscountCodes, Uuid::new_v4()));
    }
}
