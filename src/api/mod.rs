pub mod health;
pub mod stream;
pub mod title;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use http::HeaderValue;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::state::AppState;

/// Assemble the HTTP surface: health at the root, generation under the base path.
pub fn build_router(state: Arc<AppState>) -> Router {
    let base_path = normalize_base_path(&state.config.server.base_path);
    let generation = Router::new()
        .route("/generate/stream", post(stream::generate_stream))
        .route("/generate/title", post(title::generate_title));

    let router = Router::new().route("/health", get(health::health_handler));
    let router = if base_path.is_empty() {
        router.merge(generation)
    } else {
        router.nest(&base_path, generation)
    };

    router
        .layer(cors_layer(&state.config.server))
        .with_state(state)
}

/// Only the configured frontend origin, with credentials.
///
/// Methods and headers mirror the preflight request; wildcards cannot be
/// combined with credentials.
#[must_use]
pub fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);
    match HeaderValue::from_str(server.frontend_origin.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(err) => {
            tracing::warn!(
                origin = %server.frontend_origin,
                error = %err,
                "frontend origin is not a valid header value, cross-origin requests disabled"
            );
            layer
        }
    }
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

/// Parse a JSON request body, reporting problems as `InvalidRequest` (422).
pub(crate) fn parse_json_body<T>(body: &[u8]) -> Result<T, RelayError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|err| RelayError::InvalidRequest(err.to_string()))
}
