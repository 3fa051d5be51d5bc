//! Provider chunks in, encoded protocol frames out.
//!
//! Every sequence this produces is terminated: a `d:` finish frame, or the
//! run of tool-call frames for a clean `tool_calls` finish. Failures become
//! an in-band error frame followed by `d:` with reason `error`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;

use crate::cache::{
    compute_fingerprint, CacheEntry, Fingerprint, FingerprintCache, FingerprintInput, FlightGuard,
};
use crate::error::RelayError;
use crate::observability::{log_stream_complete, StreamOutcome};
use crate::protocol::{encode, FinishReason, ProtocolEvent};
use crate::provider::{ChatProvider, CompletionRequest, ProviderChunk, ProviderChunkStream};

use super::assembler::ToolCallAssembler;

/// A chat request as the relay receives it, before the system prompt is folded
/// into the message list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(model: &str, messages: Vec<Value>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        compute_fingerprint(&FingerprintInput {
            model: &self.model,
            messages: &self.messages,
            system: self.system_prompt.as_deref(),
            tools: self.tools.as_deref(),
            tool_choice: self.tool_choice.as_ref(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        })
    }

    /// Provider-facing request, with a non-empty system prompt as the leading message.
    #[must_use]
    pub fn to_completion_request(&self) -> CompletionRequest {
        let system = self
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.is_empty());
        let mut messages = Vec::with_capacity(self.messages.len() + usize::from(system.is_some()));
        if let Some(system) = system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.extend(self.messages.iter().cloned());
        CompletionRequest {
            model: self.model.clone(),
            messages,
            tools: self.tools.clone(),
            tool_choice: self.tool_choice.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

/// Drives one request: cache replay on a hit, provider translation on a miss.
pub struct StreamTranslator {
    cache: Arc<FingerprintCache>,
    provider: Arc<dyn ChatProvider>,
    request: ChatRequest,
}

impl StreamTranslator {
    #[must_use]
    pub fn new(
        cache: Arc<FingerprintCache>,
        provider: Arc<dyn ChatProvider>,
        request: ChatRequest,
    ) -> Self {
        Self {
            cache,
            provider,
            request,
        }
    }

    /// Lazy, finite frame sequence. Dropping it releases the provider stream
    /// and leaves the cache untouched.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Bytes> {
        let fingerprint = self.request.fingerprint();
        let state = TranslatorState {
            cache: self.cache,
            provider: self.provider,
            request: self.request,
            fingerprint,
            phase: Phase::Start,
            pending: VecDeque::with_capacity(4),
            produced: Vec::new(),
            recording: false,
            flight: None,
            assembler: ToolCallAssembler::new(),
            finish_reason: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            started: Instant::now(),
        };
        Box::pin(futures_util::stream::unfold(state, |mut state| async move {
            let frame = state.next_frame().await?;
            Some((frame, state))
        }))
    }
}

enum Phase {
    Start,
    Replay { entry: CacheEntry, next: usize },
    Streaming { chunks: ProviderChunkStream },
    Done,
}

struct TranslatorState {
    cache: Arc<FingerprintCache>,
    provider: Arc<dyn ChatProvider>,
    request: ChatRequest,
    fingerprint: Fingerprint,
    phase: Phase,
    pending: VecDeque<Bytes>,
    produced: Vec<Bytes>,
    recording: bool,
    flight: Option<FlightGuard>,
    assembler: ToolCallAssembler,
    finish_reason: Option<FinishReason>,
    prompt_tokens: u64,
    completion_tokens: u64,
    started: Instant,
}

impl TranslatorState {
    async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }

            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Start => self.phase = self.start().await,
                Phase::Replay { entry, next } => {
                    if next > 0 {
                        tokio::task::yield_now().await;
                    }
                    if let Some(frame) = entry.frames().get(next).cloned() {
                        self.phase = Phase::Replay {
                            entry,
                            next: next + 1,
                        };
                        return Some(frame);
                    }
                    self.log_complete(StreamOutcome::CacheHit);
                }
                Phase::Streaming { mut chunks } => match chunks.next().await {
                    Some(Ok(chunk)) => {
                        self.absorb(chunk);
                        self.phase = Phase::Streaming { chunks };
                    }
                    Some(Err(err)) => {
                        drop(chunks);
                        self.fail(&err);
                    }
                    None => self.finish_clean(),
                },
                Phase::Done => return None,
            }
        }
    }

    async fn start(&mut self) -> Phase {
        match self.cache.get(&self.fingerprint) {
            Ok(Some(entry)) => return self.replay(entry),
            Ok(None) => {}
            Err(err) => {
                self.fail(&err);
                return Phase::Done;
            }
        }

        if self.cache.is_enabled() {
            let flight = self.cache.acquire_flight(self.fingerprint).await;
            // another request may have filled the entry while we waited
            match self.cache.get(&self.fingerprint) {
                Ok(Some(entry)) => return self.replay(entry),
                Ok(None) => self.flight = Some(flight),
                Err(err) => {
                    self.fail(&err);
                    return Phase::Done;
                }
            }
        }

        tracing::debug!(
            fingerprint = %self.fingerprint,
            provider = self.provider.name(),
            model = %self.request.model,
            "cache miss, calling provider"
        );
        self.recording = true;
        let request = self.request.to_completion_request();
        match self.provider.open_stream(&request).await {
            Ok(chunks) => Phase::Streaming { chunks },
            Err(err) => {
                self.fail(&err);
                Phase::Done
            }
        }
    }

    fn replay(&self, entry: CacheEntry) -> Phase {
        tracing::debug!(
            fingerprint = %self.fingerprint,
            frames = entry.len(),
            "cache hit, replaying"
        );
        Phase::Replay { entry, next: 0 }
    }

    fn absorb(&mut self, chunk: ProviderChunk) {
        if let Some(usage) = chunk.usage {
            self.prompt_tokens = usage.prompt_tokens.unwrap_or(0);
            self.completion_tokens = usage.completion_tokens.unwrap_or(0);
        }
        if let Some(text) = chunk.text.filter(|text| !text.is_empty()) {
            self.emit(&ProtocolEvent::Text(text));
        }
        for fragment in &chunk.tool_calls {
            self.assembler.push(fragment);
        }
        if let Some(reason) = chunk.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            self.finish_reason = Some(FinishReason::from_provider(reason));
        }
    }

    fn emit(&mut self, event: &ProtocolEvent) {
        let frame = encode(event);
        if self.recording {
            self.produced.push(frame.clone());
        }
        self.pending.push_back(frame);
    }

    fn finish_clean(&mut self) {
        let reason = self.finish_reason.unwrap_or(FinishReason::Unknown);
        let mut outcome = StreamOutcome::Completed(reason);
        if self.assembler.dropped_fragments() > 0 {
            tracing::warn!(
                model = %self.request.model,
                dropped = self.assembler.dropped_fragments(),
                "tool-call fragments arrived without an open call"
            );
        }
        if reason == FinishReason::ToolCalls {
            let calls = std::mem::take(&mut self.assembler).finish();
            if calls.is_empty() {
                tracing::warn!(
                    model = %self.request.model,
                    "finish reason tool_calls without any assembled call"
                );
                self.emit_finish(reason);
            } else {
                outcome = StreamOutcome::ToolCalls(calls.len());
                for call in &calls {
                    self.emit(call);
                }
            }
        } else {
            self.emit_finish(reason);
        }
        self.commit(outcome);
    }

    fn emit_finish(&mut self, reason: FinishReason) {
        self.emit(&ProtocolEvent::FinishMessage {
            reason,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        });
    }

    fn fail(&mut self, err: &RelayError) {
        tracing::error!(
            provider = self.provider.name(),
            endpoint = self.provider.endpoint(),
            model = %self.request.model,
            kind = ?err.kind(),
            error = %err,
            "stream translation failed"
        );
        self.emit(&ProtocolEvent::Error(err.stream_message(&self.request.model)));
        self.emit(&ProtocolEvent::error_finish());
        self.prompt_tokens = 0;
        self.completion_tokens = 0;
        self.commit(StreamOutcome::Failed(err.kind()));
    }

    /// Store what this miss produced and let waiting requests in.
    fn commit(&mut self, outcome: StreamOutcome) {
        if self.recording && !self.produced.is_empty() {
            let frames = std::mem::take(&mut self.produced);
            tracing::debug!(
                fingerprint = %self.fingerprint,
                frames = frames.len(),
                "storing translated frames"
            );
            self.cache.put(self.fingerprint, frames);
        }
        self.recording = false;
        self.flight = None;
        self.phase = Phase::Done;
        self.log_complete(outcome);
    }

    fn log_complete(&self, outcome: StreamOutcome) {
        log_stream_complete(
            self.provider.name(),
            &self.request.model,
            outcome,
            self.prompt_tokens,
            self.completion_tokens,
            self.started.elapsed(),
        );
    }
}
