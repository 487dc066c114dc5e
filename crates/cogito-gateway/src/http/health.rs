use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::app::AppState;

/// GET /health, liveness probe with server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("COGITO_GIT_SHA"),
        "protocol": cogito_core::config::PROTOCOL_VERSION,
        "ws_clients": state.ws_connections.load(Ordering::Relaxed),
        "active_turns": state.active_turns.len(),
        "models": state.registry.summaries().len(),
    }))
}
