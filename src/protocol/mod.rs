pub mod event;
pub mod openai_chat;

pub use event::{encode, try_encode, FinishReason, ProtocolEvent};
