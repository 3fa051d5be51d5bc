use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{future, Stream, StreamExt};
use serde_json::Value;

use crate::config::{ProviderConfig, ServerConfig};
use crate::error::RelayError;
use crate::protocol::openai_chat::{
    OpenAiChatRequest, OpenAiChatResponse, OpenAiStreamChunk, OpenAiStreamOptions,
};
use crate::stream::sse::{sse_event_stream, SseEvent};

use super::{ChatProvider, CompletionRequest, ProviderChunk, ProviderChunkStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn build_http_client(
    timeout: Duration,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Client for any provider exposing the OpenAI `chat/completions` API.
///
/// `timeout` bounds the wait for response headers and every gap between body
/// chunks, so long generations are not cut off as long as bytes keep flowing.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    chat_url: url::Url,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Client that ignores proxy environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = build_http_client(timeout, None, false, None)?;
        Self::with_client(name, base_url, api_key, timeout, client)
    }

    /// Client for a configured provider, honoring its proxy and the server's
    /// pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the base URL or proxy is invalid.
    pub fn from_config(
        provider: &ProviderConfig,
        api_key: &str,
        server: &ServerConfig,
    ) -> Result<Self, RelayError> {
        let timeout = provider.timeout();
        let client = build_http_client(
            timeout,
            server.pool_idle_timeout(),
            server.http_use_env_proxy,
            provider.proxy.as_deref(),
        )?;
        Self::with_client(&provider.name, provider.base_url(), api_key, timeout, client)
    }

    fn with_client(
        name: &str,
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Result<Self, RelayError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let chat_url = url::Url::parse(&format!("{base_url}/chat/completions")).map_err(|err| {
            RelayError::Config(format!("Provider '{name}': invalid base_url: {err}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            base_url,
            chat_url,
            api_key: api_key.to_string(),
            timeout,
            client,
        })
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> Result<Vec<u8>, RelayError> {
        let auto = Value::String("auto".to_string());
        let tools = request.tools.as_deref().filter(|tools| !tools.is_empty());
        let tool_choice = match (tools, request.tool_choice.as_ref()) {
            (_, Some(choice)) => Some(choice),
            (Some(_), None) => Some(&auto),
            (None, None) => None,
        };
        let body = OpenAiChatRequest {
            model: &request.model,
            messages: &request.messages,
            tools,
            tool_choice,
            stream,
            stream_options: stream.then_some(OpenAiStreamOptions {
                include_usage: true,
            }),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        };
        serde_json::to_vec(&body)
            .map_err(|err| RelayError::Unexpected(format!("Failed to encode request: {err}")))
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, RelayError> {
        let body = Self::request_body(request, stream)?;
        let pending = self
            .client
            .post(self.chat_url.clone())
            .bearer_auth(&self.api_key)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(
                http::header::ACCEPT,
                if stream {
                    "text/event-stream"
                } else {
                    "application/json"
                },
            )
            .body(body)
            .send();

        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| RelayError::Timeout {
                endpoint: self.base_url.clone(),
            })?
            .map_err(|err| map_transport_error(&err, &self.base_url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body_bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        let message = upstream_error_message(&body_bytes);
        tracing::warn!(
            provider = %self.name,
            model = %request.model,
            status = status.as_u16(),
            error = %message,
            "provider rejected chat completion"
        );
        Err(map_status_error(
            status,
            &self.name,
            &request.model,
            message,
        ))
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderChunkStream, RelayError> {
        let response = self.send(request, true).await?;
        let bytes = idle_timeout_stream(
            response.bytes_stream(),
            self.timeout,
            self.base_url.clone(),
        );
        let endpoint = self.base_url.clone();
        let chunks = sse_event_stream(bytes)
            .filter_map(move |item| future::ready(decode_sse_item(item, &endpoint)));
        Ok(Box::pin(chunks))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, RelayError> {
        let response = self.send(request, false).await?;
        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| RelayError::Timeout {
                endpoint: self.base_url.clone(),
            })?
            .map_err(|err| map_transport_error(&err, &self.base_url))?;
        let parsed: OpenAiChatResponse = serde_json::from_slice(&body).map_err(|err| {
            RelayError::Unexpected(format!("Malformed completion response: {err}"))
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content))
    }
}

struct IdleTimeoutState<S> {
    source: Pin<Box<S>>,
    timeout: Duration,
    endpoint: String,
    done: bool,
}

/// Fail the body stream with `Timeout` when no chunk arrives within `timeout`.
fn idle_timeout_stream<S>(
    source: S,
    timeout: Duration,
    endpoint: String,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = IdleTimeoutState {
        source: Box::pin(source),
        timeout,
        endpoint,
        done: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        match tokio::time::timeout(state.timeout, state.source.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), state)),
            Ok(Some(Err(err))) => {
                state.done = true;
                let mapped = map_transport_error(&err, &state.endpoint);
                Some((Err(mapped), state))
            }
            Ok(None) => None,
            Err(_) => {
                state.done = true;
                let endpoint = state.endpoint.clone();
                Some((Err(RelayError::Timeout { endpoint }), state))
            }
        }
    })
}

fn decode_sse_item(
    item: Result<SseEvent, RelayError>,
    endpoint: &str,
) -> Option<Result<ProviderChunk, RelayError>> {
    let event = match item {
        Ok(event) => event,
        Err(err) => return Some(Err(err)),
    };
    if event.is_done() || event.data.trim().is_empty() {
        return None;
    }
    let chunk: OpenAiStreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::debug!(endpoint, data = %event.data, "undecodable provider chunk");
            return Some(Err(RelayError::Unexpected(format!(
                "Malformed stream chunk from {endpoint}: {err}"
            ))));
        }
    };
    if let Some(error) = chunk.error.as_ref() {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Some(Err(RelayError::Unexpected(format!(
            "Provider reported an in-stream error: {message}"
        ))));
    }
    Some(Ok(ProviderChunk::from(chunk)))
}

fn map_transport_error(err: &reqwest::Error, endpoint: &str) -> RelayError {
    if err.is_timeout() {
        RelayError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        RelayError::ConnectionFailure {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    } else {
        RelayError::Unexpected(err.to_string())
    }
}

fn map_status_error(
    status: http::StatusCode,
    provider: &str,
    model: &str,
    message: String,
) -> RelayError {
    match status {
        http::StatusCode::NOT_FOUND => RelayError::ModelNotFound {
            provider: provider.to_string(),
            model: model.to_string(),
        },
        http::StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited {
            provider: provider.to_string(),
            message,
        },
        _ => RelayError::UpstreamStatus {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull `error.message` out of an error body, truncated; the raw text otherwise.
///
/// Google's compatibility layer wraps the error object in a one-element array.
fn upstream_error_message(body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<Value>(body).ok().and_then(|json| {
        let json = match json {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        json.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let message = from_json.unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    truncate_chars(message, MAX_ERROR_MESSAGE_LEN)
}

fn truncate_chars(mut text: String, max_len: usize) -> String {
    if text.len() <= max_len {
        return text;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("...");
    text
}
