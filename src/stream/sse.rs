//! Incremental SSE parsing for provider response bodies.
//!
//! Bytes arrive in arbitrary network chunks; frames, lines, and even UTF-8
//! sequences may be split across them.

use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// `data: [DONE]` terminator used by OpenAI-compatible providers.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

/// Incremental SSE line parser.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
        }
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    ///
    /// - `data:` lines append to the data buffer (one leading space stripped),
    ///   multiple lines joined with `\n`
    /// - `event:` sets the type of the next event
    /// - a blank line dispatches the event
    /// - `:` comment lines and unknown fields are ignored
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing event the peer never terminated with a blank line.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let tail = self.buffer[self.read_offset..].to_string();
            let line = tail.strip_suffix('\r').unwrap_or(&tail);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode as much of `remainder` as forms valid UTF-8 and feed it to the parser,
/// keeping an incomplete trailing sequence for the next chunk. Invalid bytes
/// become U+FFFD.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, parsed: &mut Vec<SseEvent>) {
    let mut start = 0;
    while start < remainder.len() {
        match std::str::from_utf8(&remainder[start..]) {
            Ok(text) => {
                parser.feed_into(text, parsed);
                start = remainder.len();
            }
            Err(err) => {
                let valid_end = start + err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&remainder[start..valid_end]) {
                    parser.feed_into(text, parsed);
                }
                match err.error_len() {
                    Some(invalid) => {
                        parser.feed_into("\u{fffd}", parsed);
                        start = valid_end + invalid;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    remainder.drain(..start);
}

struct SseStreamState<S> {
    source: std::pin::Pin<Box<S>>,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    exhausted: bool,
}

/// Split a byte stream into SSE events.
///
/// Transport errors are forwarded as items; the stream ends after the source does.
pub fn sse_event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    let state = SseStreamState {
        source: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        exhausted: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }

            match state.source.as_mut().next().await {
                Some(Ok(bytes)) => {
                    state.remainder.extend_from_slice(&bytes);
                    feed_utf8(&mut state.parser, &mut state.remainder, &mut state.parsed);
                }
                Some(Err(err)) => return Some((Err(err), state)),
                None => {
                    state.exhausted = true;
                    if !state.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&state.remainder).into_owned();
                        state.remainder.clear();
                        state.parser.feed_into(&tail, &mut state.parsed);
                    }
                    state.parser.finish_into(&mut state.parsed);
                }
            }
            state.pending.extend_from_vec(&mut state.parsed);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_parse_simple_data_frame() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: hello world\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello world");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_parse_multiline_data_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\ndata: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_parse_incremental_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: hel").is_empty());
        assert!(parser.feed("lo\r\n").is_empty());
        let events = parser.feed("\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_done_frame() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        let mut out = Vec::new();
        parser.feed_into("data: {\"a\":1}", &mut out);
        assert!(out.is_empty());
        parser.finish_into(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_event_stream_handles_split_utf8() {
        let text = "data: caf\u{e9}\n\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&text[..split])),
            Ok(Bytes::copy_from_slice(&text[split..])),
        ]);
        let events: Vec<_> = sse_event_stream(source).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "caf\u{e9}");
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_buffered() {
        let mut parser = SseParser::new();
        let mut remainder = b"data: a\xffb\n\ndata: \xe2\x82".to_vec();
        let mut parsed = Vec::new();
        feed_utf8(&mut parser, &mut remainder, &mut parsed);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].data, "a\u{fffd}b");
        assert_eq!(remainder, b"\xe2\x82");

        remainder.extend_from_slice(b"\xac\n\n");
        feed_utf8(&mut parser, &mut remainder, &mut parsed);
        assert!(remainder.is_empty());
        assert_eq!(parsed[1].data, "\u{20ac}");
    }

    #[tokio::test]
    async fn test_event_stream_continues_past_invalid_byte() {
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, std::io::Error>(Bytes::from_static(b"data: a\xff\n\n")),
            Ok(Bytes::from_static(b"data: second\n\n")),
        ])
        .chain(futures_util::stream::pending());
        let events: Vec<_> = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            sse_event_stream(source).take(2).collect::<Vec<_>>(),
        )
        .await
        .expect("events delivered while the source stays open");
        assert_eq!(events[0].as_ref().unwrap().data, "a\u{fffd}");
        assert_eq!(events[1].as_ref().unwrap().data, "second");
    }

    #[tokio::test]
    async fn test_event_stream_forwards_errors() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: first\n\n")),
            Err("reset"),
        ]);
        let events: Vec<_> = sse_event_stream(source).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "first");
        assert_eq!(events[1], Err("reset"));
    }
}
