//! Streaming model endpoint: wire types, HTTP client, stream reader.

pub mod client;
pub mod stream;
pub mod types;

pub use client::{ModelClient, StreamPart};
pub use stream::{read_stream, StreamOutcome};
pub use types::{
    ChatMessage, ChatMetrics, ChatOptions, ChatRequest, Role, ToolCall, ToolDef,
};
