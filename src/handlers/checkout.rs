use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::checkout::SubmitCheckoutInput,
    AppState,
};
use axum::{extract::State, response::Response, Json};
use std::sync::Arc;

use super::{
    common::{no_content_response, see_other_response},
    SessionId,
};

/// Stores the signup form against the session for the later submission.
pub async fn set_profile_details(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    Json(details): Json<serde_json::Value>,
) -> Result<Response, ServiceError> {
    if !details.is_object() {
        return Err(ServiceError::ValidationError(
            "Profile details must be an object".to_string(),
        ));
    }
    state
        .services
        .checkout
        .set_profile_details(&session.0, details)
        .await?;
    Ok(no_content_response())
}

/// Final checkout step. Successful (and absorbed duplicate) submissions both
/// answer 303 pointing at the payment page.
pub async fn submit_checkout(
    State(state): State<Arc<AppState>>,
    session: SessionId,
    user: AuthenticatedUser,
    Json(input): Json<SubmitCheckoutInput>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .services
        .checkout
        .submit(&session.0, user.id, input)
        .await?;

    Ok(see_other_response(outcome.payment_url))
}
