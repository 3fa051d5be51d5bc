pub mod assembler;
pub mod sse;
pub mod translator;

pub use assembler::ToolCallAssembler;
pub use sse::{sse_event_stream, SseEvent, SseParser};
pub use translator::{ChatRequest, StreamTranslator};
