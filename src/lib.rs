//! ProfileYou Accounting API Library
//!
//! Cart, checkout, order and payment accounting for the profile service.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod message_queue;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::{OfflineGateway, PaymentGateway};
use crate::message_queue::SharedQueue;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
    pub queue: SharedQueue,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        queue: SharedQueue,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            queue.clone(),
        );
        Self {
            db,
            config,
            event_sender,
            services,
            queue,
            gateway: Arc::new(OfflineGateway),
        }
    }

    /// Swaps in a real payment gateway.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }
}
