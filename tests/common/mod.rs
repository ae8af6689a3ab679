use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use profileyou_accounting_api::{
    config::AppConfig,
    db,
    entities::{mailbox, payment_method, site, user},
    events::{self, EventSender},
    handlers::{self, SESSION_ID_HEADER},
    message_queue::{InMemoryProvisioningQueue, SharedQueue},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Harness spinning up the full router over a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub queue: Arc<InMemoryProvisioningQueue>,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file =
            std::env::temp_dir().join(format!("accounting_test_{}.db", Uuid::new_v4().simple()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.site_domain = "pay.test.example".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let queue = Arc::new(InMemoryProvisioningQueue::new());
        let shared_queue: SharedQueue = queue.clone();

        let state = Arc::new(AppState::new(
            db_arc,
            Arc::new(cfg),
            event_sender,
            shared_queue,
        ));
        let router = handlers::app_router(state.clone());

        Self {
            router,
            state,
            queue,
            db_file,
            _event_task: event_task,
        }
    }

    /// Send a request against the router, optionally as a user and within a
    /// checkout session.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if let Some(session_id) = session_id {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_user(&self, email: &str, is_staff: bool, is_sales_rep: bool) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            is_staff: Set(is_staff),
            is_sales_rep: Set(is_sales_rep),
            made_an_order: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user for tests")
    }

    pub async fn seed_site(&self, name: &str, price: Decimal) -> site::Model {
        let now = Utc::now();
        site::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed site for tests")
    }

    pub async fn seed_mailbox(&self, email: &str) -> mailbox::Model {
        mailbox::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            user_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed mailbox for tests")
    }

    pub async fn seed_payment_method(&self, name: &str, variant: &str) -> payment_method::Model {
        let now = Utc::now();
        payment_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            variant: Set(variant.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment method for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Deserialize a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is not valid json")
}
