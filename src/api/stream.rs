use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use super::parse_json_body;
use crate::relay::stream_chat;
use crate::state::AppState;
use crate::stream::ChatRequest;

/// Body of `POST {base_path}/generate/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamRequestBody {
    pub provider: String,
    #[serde(alias = "model_id")]
    pub base_model_id: String,
    pub messages: Vec<Value>,
    /// Accepted for compatibility; the response always streams.
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

impl StreamRequestBody {
    #[must_use]
    pub fn into_chat_request(self) -> ChatRequest {
        ChatRequest {
            model: self.base_model_id,
            messages: self.messages,
            system_prompt: self.system_prompt,
            tools: self.tools,
            tool_choice: self.tool_choice.filter(|choice| !choice.is_null()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

pub async fn generate_stream(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: StreamRequestBody = match parse_json_body(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting stream request");
            return err.into_response();
        }
    };

    let request_id = state.next_request_id();
    tracing::info!(
        request_id = %request_id,
        provider = %request.provider,
        model = %request.base_model_id,
        messages = request.messages.len(),
        tools = request.tools.as_ref().map_or(0, Vec::len),
        "stream request received"
    );

    let provider = request.provider.clone();
    let frames = stream_chat(&state, &provider, request.into_chat_request());
    let body = Body::from_stream(frames.map(Ok::<Bytes, Infallible>));
    (
        [(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
