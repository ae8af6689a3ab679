//! Work-dispatch collaborator for post-payment provisioning.
//!
//! The accounting core only ever submits item identifiers; whatever broker
//! executes the provisioning work lives outside this service.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Fire-and-forget work queue accepting catalog item identifiers.
#[async_trait]
pub trait ProvisioningQueue: Send + Sync {
    async fn submit(&self, item_id: Uuid) -> Result<(), QueueError>;
}

/// In-memory queue. Submissions are recorded so tests can assert exactly-once
/// dispatch.
#[derive(Debug, Default)]
pub struct InMemoryProvisioningQueue {
    submitted: Mutex<Vec<Uuid>>,
    max_size: Option<usize>,
}

impl InMemoryProvisioningQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            max_size: Some(max_size),
        }
    }

    /// Snapshot of everything submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<Uuid> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningQueue for InMemoryProvisioningQueue {
    async fn submit(&self, item_id: Uuid) -> Result<(), QueueError> {
        let mut submitted = self.submitted.lock().unwrap();
        if let Some(max) = self.max_size {
            if submitted.len() >= max {
                return Err(QueueError::QueueFull);
            }
        }
        submitted.push(item_id);
        info!(%item_id, "Provisioning work submitted");
        Ok(())
    }
}

/// Shared handle used across services.
pub type SharedQueue = Arc<dyn ProvisioningQueue>;
