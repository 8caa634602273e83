//! Provider wire payloads: history adaptation, prompt-cache hints, and the
//! chat-completions streaming transport.

pub mod adapter;
pub mod cache;
pub mod chat_completions;
pub mod http;
pub mod sse;

pub use adapter::{build_wire_messages, wire_tool_call};
pub use cache::{apply_cache_boundaries, requires_cache_hints};
pub use chat_completions::ChatCompletionsClient;
pub use sse::{ChatCompletion, SseAccumulator};
