use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_json_body;
use crate::error::RelayError;
use crate::state::AppState;

/// Body of `POST {base_path}/generate/title`.
#[derive(Debug, Clone, Deserialize)]
pub struct TitleRequestBody {
    pub provider: String,
    #[serde(alias = "model_id")]
    pub base_model_id: String,
    pub prompt: String,
}

pub async fn generate_title(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, RelayError> {
    let request: TitleRequestBody = parse_json_body(&body)?;
    tracing::info!(
        provider = %request.provider,
        model = %request.base_model_id,
        "title request received"
    );
    let title = crate::title::generate_title(
        &state.router,
        &request.provider,
        &request.base_model_id,
        &request.prompt,
        state.config.features.title_temperature,
    )
    .await?;
    Ok(Json(json!({ "title": title })))
}
