//! Wire format for tool-server communication (JSON-RPC 2.0).
//!
//! Two methods: `list_tools` and `call_tool(name, args)`. Domain
//! failures come back either as a JSON-RPC error object or as a result
//! with `isError: true`; both are mapped to `ToolCallError::Domain` with
//! the server's payload preserved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolCallError;

#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    pub fn list_tools(id: i64) -> Self {
        Self::new(id, "list_tools", None)
    }

    pub fn call_tool(id: i64, name: &str, args: Value) -> Self {
        Self::new(
            id,
            "call_tool",
            Some(serde_json::json!({ "name": name, "args": args })),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub id: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    /// Present on server-initiated notifications.
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool definition from `list_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<RemoteToolDef>,
}

/// Resolve a completed response into its result payload.
pub fn decode_response(response: RpcResponse) -> Result<Value, ToolCallError> {
    if let Some(error) = response.error {
        return Err(ToolCallError::Domain(
            serde_json::to_value(&error).unwrap_or(Value::Null),
        ));
    }

    let result = response
        .result
        .ok_or_else(|| ToolCallError::Protocol("response carried neither result nor error".into()))?;

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ToolCallError::Domain(result));
    }

    Ok(result)
}

/// Render a call result for the model: MCP-style `content` blocks are
/// flattened to their text, anything else is serialized as-is.
pub fn format_payload(payload: &Value) -> String {
    if let Some(blocks) = payload.get("content").and_then(Value::as_array) {
        let mut out = String::new();
        for block in blocks {
            let text = match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
                Some("resource") => block.get("uri").and_then(Value::as_str).map(str::to_string),
                Some(other) => Some(format!("[{other} content]")),
                None => None,
            };
            if let Some(text) = text {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&text);
            }
        }
        if !out.is_empty() {
            return out;
        }
    }

    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
