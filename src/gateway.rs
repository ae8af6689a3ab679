//! Payment-gateway collaborator. The real processor lives outside this
//! service; the core only hands it an amount and two return URLs, then waits
//! for a capture result or webhook.

use crate::{
    entities::payment::{self, PaymentStatus},
    errors::ServiceError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Where the gateway sends the buyer after the hosted payment page.
#[derive(Debug, Clone)]
pub struct RedirectUrls {
    pub confirmation: String,
    pub failure: String,
}

/// Result of starting a capture round-trip.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Buyer must be sent to the gateway's hosted page
    Redirect(String),
    /// Gateway settled synchronously
    Completed(PaymentStatus),
}

/// Asynchronous capture notification, delivered by the gateway's webhook.
/// Payments are addressed by token, never by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub payment_token: String,
    pub status: PaymentStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn begin_capture(
        &self,
        payment: &payment::Model,
        urls: &RedirectUrls,
    ) -> Result<CaptureOutcome, ServiceError>;
}

/// Gateway used in development and tests: skips the hosted page and sends the
/// buyer straight to the confirmation URL, leaving the payment pending until
/// the success callback or a webhook lands.
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn begin_capture(
        &self,
        payment: &payment::Model,
        urls: &RedirectUrls,
    ) -> Result<CaptureOutcome, ServiceError> {
        info!(payment_id = %payment.id, total = %payment.total, "Offline gateway capture");
        Ok(CaptureOutcome::Redirect(urls.confirmation.clone()))
    }
}
