use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};

use crate::observability::{log_stream_complete, StreamOutcome};
use crate::protocol::{encode, ProtocolEvent};
use crate::state::AppState;
use crate::stream::{ChatRequest, StreamTranslator};

/// Resolve the provider and stream the translated response.
///
/// An unknown provider never reaches the translator; the caller still gets
/// the same error-then-finish pair the translator produces on failure.
#[must_use]
pub fn stream_chat(
    state: &AppState,
    provider: &str,
    request: ChatRequest,
) -> BoxStream<'static, Bytes> {
    match state.router.resolve(provider) {
        Ok(client) => {
            StreamTranslator::new(Arc::clone(&state.cache), client, request).into_stream()
        }
        Err(err) => {
            tracing::error!(
                provider,
                model = %request.model,
                error = %err,
                "provider lookup failed"
            );
            log_stream_complete(
                provider,
                &request.model,
                StreamOutcome::Failed(err.kind()),
                0,
                0,
                std::time::Duration::ZERO,
            );
            error_pair(&err.stream_message(&request.model))
        }
    }
}

/// `Error` frame followed by the `error` finish frame.
#[must_use]
pub fn error_pair(message: &str) -> BoxStream<'static, Bytes> {
    let frames = [
        encode(&ProtocolEvent::Error(message.to_string())),
        encode(&ProtocolEvent::error_finish()),
    ];
    Box::pin(stream::iter(frames))
}
