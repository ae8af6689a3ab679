use crate::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// Liveness probe. Reports the database as part of the payload so load
/// balancers can distinguish a dead process from a dead database.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = state.db.ping().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": if db_ok { "up" } else { "down" },
    }))
}
