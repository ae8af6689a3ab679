use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the accounting core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderUpdated(Uuid),
    PaymentCreated {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentConfirmed(Uuid),
    PaymentFailed(Uuid),
    CheckoutSubmitted {
        session_id: String,
        order_id: Uuid,
    },
    DiscountCodeCreated(Uuid),
    ProfileProvisioningQueued(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is best-effort and never blocks the request path.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(?event, "Event not delivered: {}", e);
        }
    }
}

/// Drains the event channel. Events are currently only logged; downstream
/// consumers subscribe here when they materialize.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "Processing event");
    }
    info!("Event channel closed; processor exiting");
}
