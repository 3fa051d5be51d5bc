//! Folds streamed tool-call fragments into complete calls.
//!
//! A fragment carrying a function name opens a call. Bare argument fragments
//! (no id, no name) extend the most recently opened call. A fragment with an
//! id that is already known routes its arguments to that call.
//!
//! Ids may arrive apart from names. An unknown id is given to the current call
//! when that call has none yet; before any such call exists, the id (and any
//! arguments with it) is held for the next call that opens without an id.

use rustc_hash::FxHashMap;
use serde_json::value::RawValue;

use crate::error::RelayError;
use crate::protocol::ProtocolEvent;
use crate::provider::ToolCallFragment;

#[derive(Debug)]
struct ToolCallBuffer {
    internal_id: String,
    provider_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// One assembler per in-flight stream.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    buffers: Vec<ToolCallBuffer>,
    by_id: FxHashMap<String, usize>,
    current: Option<usize>,
    pending_id: Option<String>,
    pending_arguments: String,
    next_synthetic: u64,
    dropped_fragments: usize,
}

impl ToolCallAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Argument fragments that never found a call to join.
    #[must_use]
    pub fn dropped_fragments(&self) -> usize {
        self.dropped_fragments
    }

    pub fn push(&mut self, fragment: &ToolCallFragment) {
        let id = fragment.id.as_deref().filter(|id| !id.is_empty());
        let name = fragment.name.as_deref().filter(|name| !name.is_empty());
        let arguments = fragment.arguments.as_deref();

        if let Some(name) = name {
            let index = self.open(id, name);
            self.current = Some(index);
            if let Some(arguments) = arguments {
                self.buffers[index].arguments.push_str(arguments);
            }
            return;
        }

        let target = match id {
            Some(id) => match self.by_id.get(id).copied() {
                Some(index) => Some(index),
                None => self.adopt_id(id),
            },
            None => self.current,
        };
        match (target, arguments) {
            (Some(index), Some(arguments)) => self.buffers[index].arguments.push_str(arguments),
            (Some(_), None) => {}
            (None, arguments) => match id {
                Some(id) => self.hold(id, arguments.unwrap_or_default()),
                None => {
                    if let Some(arguments) = arguments {
                        self.drop_arguments(None, arguments.len());
                    }
                }
            },
        }
    }

    /// Give an unseen provider id to the current call if it has none yet.
    fn adopt_id(&mut self, id: &str) -> Option<usize> {
        let index = self.current?;
        let buffer = &mut self.buffers[index];
        if buffer.provider_id.is_some() {
            return None;
        }
        buffer.provider_id = Some(id.to_string());
        self.by_id.insert(id.to_string(), index);
        Some(index)
    }

    /// Keep an id that arrived before its call, for the next call opened without one.
    fn hold(&mut self, id: &str, arguments: &str) {
        if self.pending_id.as_deref().is_some_and(|pending| pending != id) {
            self.discard_pending();
        }
        self.pending_id = Some(id.to_string());
        self.pending_arguments.push_str(arguments);
    }

    fn discard_pending(&mut self) {
        let pending_id = self.pending_id.take();
        if !self.pending_arguments.is_empty() {
            let len = self.pending_arguments.len();
            self.pending_arguments.clear();
            self.drop_arguments(pending_id.as_deref(), len);
        }
    }

    fn drop_arguments(&mut self, id: Option<&str>, len: usize) {
        self.dropped_fragments += 1;
        tracing::warn!(
            fragment_id = id.unwrap_or(""),
            len,
            "dropping tool-call arguments with no open call"
        );
    }

    fn open(&mut self, id: Option<&str>, name: &str) -> usize {
        let mut held_arguments = String::new();
        let claims_pending = self.pending_id.is_some()
            && (id.is_none() || id == self.pending_id.as_deref());
        let provider_id = if claims_pending {
            held_arguments = std::mem::take(&mut self.pending_arguments);
            self.pending_id.take()
        } else {
            self.discard_pending();
            id.map(str::to_string)
        };

        if let Some(&index) = provider_id.as_ref().and_then(|id| self.by_id.get(id)) {
            let buffer = &mut self.buffers[index];
            if buffer.name.as_deref() != Some(name) {
                tracing::warn!(
                    tool_call_id = %buffer.internal_id,
                    previous = buffer.name.as_deref().unwrap_or(""),
                    name,
                    "tool call renamed mid-stream"
                );
            }
            buffer.name = Some(name.to_string());
            buffer.arguments.push_str(&held_arguments);
            return index;
        }

        let internal_id = match &provider_id {
            Some(id) => id.clone(),
            None => {
                let id = format!("generated_{}", self.next_synthetic);
                self.next_synthetic += 1;
                id
            }
        };
        let index = self.buffers.len();
        if let Some(id) = &provider_id {
            self.by_id.insert(id.clone(), index);
        }
        self.buffers.push(ToolCallBuffer {
            internal_id,
            provider_id,
            name: Some(name.to_string()),
            arguments: held_arguments,
        });
        index
    }

    /// Consume the assembler and produce one event per call, in arrival order.
    ///
    /// A call that cannot be rendered yields an `Error` event in its slot.
    #[must_use]
    pub fn finish(mut self) -> Vec<ProtocolEvent> {
        self.discard_pending();
        self.buffers
            .into_iter()
            .map(|buffer| match render_call(buffer) {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(error = %err, "failed to assemble tool call");
                    ProtocolEvent::Error(err.to_string())
                }
            })
            .collect()
    }
}

fn render_call(buffer: ToolCallBuffer) -> Result<ProtocolEvent, RelayError> {
    let id = buffer.provider_id.unwrap_or(buffer.internal_id);
    let name = buffer.name.ok_or_else(|| {
        RelayError::Formatting(format!("tool call '{id}' has no function name"))
    })?;
    let arguments_json = normalize_arguments(buffer.arguments)?;
    Ok(ProtocolEvent::ToolCall {
        id,
        name,
        arguments_json,
    })
}

/// Arguments that already form a JSON document pass through untouched.
/// Anything else, including an empty buffer, is wrapped as a JSON string literal.
fn normalize_arguments(raw: String) -> Result<String, RelayError> {
    if serde_json::from_str::<&RawValue>(&raw).is_ok() {
        return Ok(raw);
    }
    serde_json::to_string(&raw)
        .map_err(|err| RelayError::Formatting(format!("tool call arguments: {err}")))
}
