use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status, configured providers and cache size.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<&str> = state
        .router
        .configured_names()
        .iter()
        .map(AsRef::as_ref)
        .collect();
    Json(json!({
        "status": "ok",
        "providers": providers,
        "cache_entries": state.cache.entry_count(),
    }))
}
