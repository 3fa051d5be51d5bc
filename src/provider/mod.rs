pub mod openai_compat;

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::protocol::openai_chat::{OpenAiStreamChunk, OpenAiUsage};

pub use openai_compat::OpenAiCompatClient;

/// Provider families the relay can talk to. All of them speak the
/// OpenAI-compatible `chat/completions` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Google,
}

impl ProviderKind {
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    #[must_use]
    pub fn default_timeout_secs(self) -> u64 {
        match self {
            ProviderKind::OpenAi => 30,
            ProviderKind::Google => 60,
        }
    }

    #[must_use]
    pub fn default_api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Google => "GOOGLE_GENERATIVE_AI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Google => write!(f, "google"),
        }
    }
}

/// Normalized parameters for one chat completion.
///
/// `messages` already contains the leading system message, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

/// Token counters reported by the provider. Either side may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

/// One piece of a streamed tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    #[must_use]
    pub fn start(id: Option<&str>, name: &str) -> Self {
        Self {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            arguments: None,
        }
    }

    #[must_use]
    pub fn arguments(fragment: &str) -> Self {
        Self {
            id: None,
            name: None,
            arguments: Some(fragment.to_string()),
        }
    }
}

/// A decoded provider chunk: what the first choice of one SSE payload carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderChunk {
    pub role: Option<String>,
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ProviderChunk {
    #[must_use]
    pub fn text(content: &str) -> Self {
        Self {
            text: Some(content.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finish(reason: &str) -> Self {
        Self {
            finish_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Some(Usage {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        });
        self
    }
}

impl From<OpenAiStreamChunk> for ProviderChunk {
    fn from(chunk: OpenAiStreamChunk) -> Self {
        let mut out = ProviderChunk {
            usage: chunk.usage.map(Usage::from),
            ..ProviderChunk::default()
        };
        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };
        out.finish_reason = choice.finish_reason.filter(|reason| !reason.is_empty());
        if let Some(delta) = choice.delta {
            out.role = delta.role;
            out.text = delta.content;
            out.tool_calls = delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| {
                    let (name, arguments) = match call.function {
                        Some(function) => (function.name, function.arguments),
                        None => (None, None),
                    };
                    ToolCallFragment {
                        id: call.id.filter(|id| !id.is_empty()),
                        name: name.filter(|name| !name.is_empty()),
                        arguments,
                    }
                })
                .collect();
        }
        out
    }
}

/// Lazy sequence of provider chunks. A fault mid-stream ends it with `Err`.
pub type ProviderChunkStream = BoxStream<'static, Result<ProviderChunk, RelayError>>;

/// Capability interface over one configured provider.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Base endpoint, used in connection-failure messages.
    fn endpoint(&self) -> &str;

    /// Open a streaming chat completion.
    ///
    /// # Errors
    ///
    /// Returns the categorized [`RelayError`] when the request cannot be started
    /// or the provider rejects it.
    async fn open_stream(&self, request: &CompletionRequest)
        -> Result<ProviderChunkStream, RelayError>;

    /// Run a non-streaming completion and return the first choice's content.
    ///
    /// # Errors
    ///
    /// Same categories as [`ChatProvider::open_stream`].
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_from_wire_reads_first_choice() {
        let wire: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [
                {"index": 0, "delta": {"role": "assistant", "content": "Hel"}},
                {"index": 1, "delta": {"content": "ignored"}}
            ]
        }))
        .unwrap();
        let chunk = ProviderChunk::from(wire);
        assert_eq!(chunk.role.as_deref(), Some("assistant"));
        assert_eq!(chunk.text.as_deref(), Some("Hel"));
        assert!(chunk.finish_reason.is_none());
    }

    #[test]
    fn test_chunk_from_wire_normalizes_tool_fragments() {
        let wire: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {"tool_calls": [
                    {"index": 0, "id": "", "function": {"name": "getWeather", "arguments": ""}},
                    {"index": 0, "function": {"arguments": "{\"lat\":"}}
                ]},
                "finish_reason": ""
            }]
        }))
        .unwrap();
        let chunk = ProviderChunk::from(wire);
        assert!(chunk.finish_reason.is_none());
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, None);
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("getWeather"));
        assert_eq!(chunk.tool_calls[1], ToolCallFragment::arguments("{\"lat\":"));
    }

    #[test]
    fn test_chunk_from_wire_usage_only() {
        let wire: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [],
            "usage": {"prompt_tokens": 7}
        }))
        .unwrap();
        let chunk = ProviderChunk::from(wire);
        assert_eq!(
            chunk.usage,
            Some(Usage {
                prompt_tokens: Some(7),
                completion_tokens: None
            })
        );
    }

    #[test]
    fn test_provider_kind_defaults() {
        assert_eq!(ProviderKind::OpenAi.default_timeout_secs(), 30);
        assert_eq!(ProviderKind::Google.default_timeout_secs(), 60);
        assert_eq!(ProviderKind::Google.to_string(), "google");
        let kind: ProviderKind = serde_json::from_value(json!("google")).unwrap();
        assert_eq!(kind, ProviderKind::Google);
    }
}
