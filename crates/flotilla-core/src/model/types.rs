//! Wire types for the streaming chat endpoint.
//!
//! The endpoint speaks an Ollama-style protocol: a POST with
//! `{model, messages, tools?, options, think?}` answered by
//! newline-delimited JSON chunks carrying `message.content`,
//! `message.thinking`, `message.tool_calls`, and a terminal chunk with
//! evaluation counts and durations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message in the endpoint's flat format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    /// Qualified tool name on `Role::Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

/// Canonical parsed tool invocation: a qualified name plus a JSON
/// argument object. Both structured stream events and the text parser
/// produce this shape; nothing downstream sees the wire variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Split `server.op` into its server and operation halves. Unqualified
    /// names have no server.
    pub fn split_name(&self) -> (Option<&str>, &str) {
        match self.name.split_once('.') {
            Some((server, op)) => (Some(server), op),
            None => (None, &self.name),
        }
    }
}

/// Tool call as it appears on the wire (`{"function": {"name", "arguments"}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        ToolCall {
            name: wire.function.name,
            arguments: wire.function.arguments,
        }
    }
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        WireToolCall {
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// Tool definition serialized into the request's `tools` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDef {
    /// The endpoint expects `{"type": "function", "function": {...}}`.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Sampling options forwarded to the endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// A streaming chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    pub options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    pub stream: bool,
}

/// Execution metrics from the terminal stream chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMetrics {
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub eval_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
}

impl ChatMetrics {
    /// Tokens per second over the evaluation phase, if measurable.
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.eval_duration == 0 {
            return None;
        }
        Some(self.eval_count as f64 / (self.eval_duration as f64 / 1e9))
    }
}

/// One decoded chunk of the streaming response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl ChatChunk {
    pub fn metrics(&self) -> Option<ChatMetrics> {
        if !self.done {
            return None;
        }
        Some(ChatMetrics {
            eval_count: self.eval_count.unwrap_or(0),
            prompt_eval_count: self.prompt_eval_count.unwrap_or(0),
            total_duration: self.total_duration.unwrap_or(0),
            eval_duration: self.eval_duration.unwrap_or(0),
            load_duration: self.load_duration.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qualified_name_splits() {
        let call = ToolCall::new("nextcloud.list_files", json!({}));
        assert_eq!(call.split_name(), (Some("nextcloud"), "list_files"));

        let bare = ToolCall::new("read_file", json!({}));
        assert_eq!(bare.split_name(), (None, "read_file"));
    }

    #[test]
    fn chunk_decodes_content_and_metrics() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"message":{"content":"hi"},"done":false}"#,
        )
        .unwrap();
        assert!(chunk.metrics().is_none());
        assert_eq!(chunk.message.unwrap().content.as_deref(), Some("hi"));

        let done: ChatChunk = serde_json::from_str(
            r#"{"done":true,"eval_count":42,"eval_duration":2000000000}"#,
        )
        .unwrap();
        let metrics = done.metrics().unwrap();
        assert_eq!(metrics.eval_count, 42);
        assert_eq!(metrics.tokens_per_second(), Some(21.0));
    }

    #[test]
    fn tool_message_carries_tool_name() {
        let msg = ChatMessage::tool("builtin.read_file", "contents");
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["role"], "tool");
        assert_eq!(encoded["tool_name"], "builtin.read_file");
        assert!(encoded.get("tool_calls").is_none());
    }
}
