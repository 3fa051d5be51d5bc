//! Downstream event protocol.
//!
//! Every frame is `<code>:<json>\n`. Codes: `0` text, `1` tool call,
//! `3` error, `d` finish message. Clients ignore codes they do not know.

use bytes::Bytes;
use serde::Serialize;

use crate::error::RelayError;
use crate::util::{push_json_string_escaped, push_u64_decimal};

pub const TEXT_CODE: char = '0';
pub const TOOL_CALL_CODE: char = '1';
pub const ERROR_CODE: char = '3';
pub const FINISH_MESSAGE_CODE: char = 'd';

/// Reason a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
    Unknown,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Error => "error",
            FinishReason::Unknown => "unknown",
        }
    }

    /// Map a provider `finish_reason` string. Only `stop`, `length` and
    /// `tool_calls` are recognized; `error` is reserved for relay-side failures.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("stop") {
            FinishReason::Stop
        } else if raw.eq_ignore_ascii_case("length") {
            FinishReason::Length
        } else if raw.eq_ignore_ascii_case("tool_calls") {
            FinishReason::ToolCalls
        } else {
            FinishReason::Unknown
        }
    }
}

/// A typed protocol event prior to encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
    Error(String),
    FinishMessage {
        reason: FinishReason,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

impl ProtocolEvent {
    #[must_use]
    pub fn type_code(&self) -> char {
        match self {
            ProtocolEvent::Text(_) => TEXT_CODE,
            ProtocolEvent::ToolCall { .. } => TOOL_CALL_CODE,
            ProtocolEvent::Error(_) => ERROR_CODE,
            ProtocolEvent::FinishMessage { .. } => FINISH_MESSAGE_CODE,
        }
    }

    fn part_name(&self) -> &'static str {
        match self {
            ProtocolEvent::Text(_) => "text",
            ProtocolEvent::ToolCall { .. } => "tool_call",
            ProtocolEvent::Error(_) => "error",
            ProtocolEvent::FinishMessage { .. } => "finish_message",
        }
    }

    /// Terminal frame for every failure path.
    #[must_use]
    pub fn error_finish() -> Self {
        ProtocolEvent::FinishMessage {
            reason: FinishReason::Error,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

#[derive(Serialize)]
struct ToolCallPayload<'a> {
    id: &'a str,
    function_call: FunctionCallPayload<'a>,
}

#[derive(Serialize)]
struct FunctionCallPayload<'a> {
    name: &'a str,
    arguments: &'a str,
}

/// Encode an event into its wire frame. Never fails: a payload that cannot be
/// serialized is replaced by an error frame naming the part type.
#[must_use]
pub fn encode(event: &ProtocolEvent) -> Bytes {
    try_encode(event).unwrap_or_else(|err| {
        tracing::error!(part = event.part_name(), error = %err, "failed to format stream part");
        formatting_error_frame(event.part_name())
    })
}

/// Encode an event, reporting serialization failures instead of substituting.
///
/// # Errors
///
/// Returns [`RelayError::Formatting`] when the payload cannot be serialized.
pub fn try_encode(event: &ProtocolEvent) -> Result<Bytes, RelayError> {
    match event {
        ProtocolEvent::Text(text) => Ok(string_frame(TEXT_CODE, text)),
        ProtocolEvent::Error(message) => Ok(string_frame(ERROR_CODE, message)),
        ProtocolEvent::FinishMessage {
            reason,
            prompt_tokens,
            completion_tokens,
        } => {
            let mut out = String::with_capacity(96);
            out.push(FINISH_MESSAGE_CODE);
            out.push_str(":{\"finishReason\":");
            push_json_string_escaped(&mut out, reason.as_str());
            out.push_str(",\"usage\":{\"promptTokens\":");
            push_u64_decimal(&mut out, *prompt_tokens);
            out.push_str(",\"completionTokens\":");
            push_u64_decimal(&mut out, *completion_tokens);
            out.push_str("}}\n");
            Ok(Bytes::from(out))
        }
        ProtocolEvent::ToolCall {
            id,
            name,
            arguments_json,
        } => {
            let payload = ToolCallPayload {
                id,
                function_call: FunctionCallPayload {
                    name,
                    arguments: arguments_json,
                },
            };
            serialized_frame(TOOL_CALL_CODE, &payload)
        }
    }
}

fn string_frame(code: char, value: &str) -> Bytes {
    let mut out = String::with_capacity(value.len() + 5);
    out.push(code);
    out.push(':');
    push_json_string_escaped(&mut out, value);
    out.push('\n');
    Bytes::from(out)
}

fn serialized_frame<T: Serialize + ?Sized>(code: char, payload: &T) -> Result<Bytes, RelayError> {
    let mut out = Vec::with_capacity(128);
    let mut prefix = [0u8; 4];
    out.extend_from_slice(code.encode_utf8(&mut prefix).as_bytes());
    out.push(b':');
    serde_json::to_writer(&mut out, payload)
        .map_err(|e| RelayError::Formatting(format!("stream part code {code}: {e}")))?;
    out.push(b'\n');
    Ok(Bytes::from(out))
}

fn formatting_error_frame(part: &str) -> Bytes {
    string_frame(ERROR_CODE, &format!("Failed to format stream part: {part}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &Bytes) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_encode_text() {
        let frame = encode(&ProtocolEvent::Text("Hel".to_string()));
        assert_eq!(text(&frame), "0:\"Hel\"\n");
    }

    #[test]
    fn test_encode_error_is_plain_string() {
        let frame = encode(&ProtocolEvent::Error("boom".to_string()));
        assert_eq!(text(&frame), "3:\"boom\"\n");
    }

    #[test]
    fn test_encode_finish_message() {
        let frame = encode(&ProtocolEvent::FinishMessage {
            reason: FinishReason::Stop,
            prompt_tokens: 3,
            completion_tokens: 2,
        });
        assert_eq!(
            text(&frame),
            "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":3,\"completionTokens\":2}}\n"
        );
    }

    #[test]
    fn test_encode_tool_call_double_encodes_arguments() {
        let frame = encode(&ProtocolEvent::ToolCall {
            id: "c1".to_string(),
            name: "getWeather".to_string(),
            arguments_json: "{\"lat\":1}".to_string(),
        });
        assert_eq!(
            text(&frame),
            "1:{\"id\":\"c1\",\"function_call\":{\"name\":\"getWeather\",\"arguments\":\"{\\\"lat\\\":1}\"}}\n"
        );
    }

    #[test]
    fn test_encode_handles_awkward_payloads() {
        let awkward = [
            String::new(),
            "\u{0000}\u{0001}\u{001f}".to_string(),
            "line\nbreak\ttab\r".to_string(),
            "\u{1f600} \u{fffd} \u{2028}".to_string(),
            "\"quoted\" \\ back".to_string(),
        ];
        for value in awkward {
            let events = [
                ProtocolEvent::Text(value.clone()),
                ProtocolEvent::Error(value.clone()),
                ProtocolEvent::ToolCall {
                    id: value.clone(),
                    name: value.clone(),
                    arguments_json: value.clone(),
                },
            ];
            for event in &events {
                let frame = encode(event);
                let line = text(&frame);
                assert!(line.ends_with('\n'));
                assert_eq!(line.matches('\n').count(), 1, "frame must be one line");
                let (code, json) = line.split_once(':').unwrap();
                assert_eq!(code.chars().next(), Some(event.type_code()));
                let parsed: serde_json::Value = serde_json::from_str(json.trim_end()).unwrap();
                match event {
                    ProtocolEvent::Text(v) | ProtocolEvent::Error(v) => {
                        assert_eq!(parsed.as_str(), Some(v.as_str()));
                    }
                    ProtocolEvent::ToolCall { arguments_json, .. } => {
                        assert_eq!(
                            parsed["function_call"]["arguments"].as_str(),
                            Some(arguments_json.as_str())
                        );
                    }
                    ProtocolEvent::FinishMessage { .. } => unreachable!(),
                }
            }
        }
    }

    #[test]
    fn test_unserializable_payload_becomes_error_frame() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("nope"))
            }
        }

        let err = serialized_frame(TOOL_CALL_CODE, &Broken).unwrap_err();
        assert!(matches!(err, RelayError::Formatting(_)));
        let frame = formatting_error_frame("tool_call");
        assert_eq!(text(&frame), "3:\"Failed to format stream part: tool_call\"\n");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("STOP"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_provider("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            FinishReason::from_provider("content_filter"),
            FinishReason::Unknown
        );
        assert_eq!(FinishReason::from_provider("error"), FinishReason::Unknown);
    }
}
