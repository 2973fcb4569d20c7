//! Config and system-prompt built-ins.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::ToolResult;

use super::{BuiltinState, BuiltinTool};

pub struct GetConfigTool;

#[derive(Deserialize)]
struct GetConfigParams {
    #[serde(default)]
    section: Option<String>,
}

#[async_trait]
impl BuiltinTool for GetConfigTool {
    fn name(&self) -> &'static str {
        "get_config"
    }

    fn description(&self) -> &'static str {
        "Read the session configuration, or one top-level section of it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "section": {"type": "string", "description": "Top-level section name, e.g. 'delegation' or 'mcpServers'"}
            }
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: GetConfigParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let config = state.config.read().await;
        match config.section(params.section.as_deref()) {
            Ok(section) => ToolResult::success(
                serde_json::to_string_pretty(&section).unwrap_or_else(|_| section.to_string()),
            ),
            Err(e) => ToolResult::error(e),
        }
    }
}

pub struct UpdateConfigSectionTool;

#[derive(Deserialize)]
struct UpdateSectionParams {
    section: String,
    values: Value,
}

#[async_trait]
impl BuiltinTool for UpdateConfigSectionTool {
    fn name(&self) -> &'static str {
        "update_config_section"
    }

    fn description(&self) -> &'static str {
        "Replace one top-level config section. The values object must be the COMPLETE section \
         with all of its fields; read the current section first, modify what you need, and send \
         the whole section back. Partial updates are rejected."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "section": {"type": "string", "description": "Top-level section name"},
                "values": {"type": "object", "description": "The complete replacement section"}
            },
            "required": ["section", "values"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: UpdateSectionParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let mut config = state.config.write().await;
        if let Err(e) = config.update_section(&params.section, params.values) {
            return ToolResult::error(e);
        }
        if let Err(e) = config.save(&state.config_path) {
            return ToolResult::error(format!("section updated but not persisted: {e}"));
        }

        ToolResult::success(format!(
            "Updated config section '{}' and saved to {}",
            params.section,
            state.config_path.display()
        ))
    }
}

pub struct GetSystemPromptTool;

#[async_trait]
impl BuiltinTool for GetSystemPromptTool {
    fn name(&self) -> &'static str {
        "get_system_prompt"
    }

    fn description(&self) -> &'static str {
        "Show the session's custom system prompt, if one is set."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, state: &BuiltinState) -> ToolResult {
        match state.system_prompt.read().await.as_deref() {
            Some(prompt) => ToolResult::success(prompt.to_string()),
            None => ToolResult::success("No custom system prompt is set."),
        }
    }
}

pub struct SetSystemPromptTool;

#[derive(Deserialize)]
struct SetPromptParams {
    prompt: String,
}

#[async_trait]
impl BuiltinTool for SetSystemPromptTool {
    fn name(&self) -> &'static str {
        "set_system_prompt"
    }

    fn description(&self) -> &'static str {
        "Replace the session's custom system prompt for direct chat."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "The new system prompt"}
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: SetPromptParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        let chars = params.prompt.chars().count();
        *state.system_prompt.write().await = Some(params.prompt);
        ToolResult::success(format!("System prompt updated ({chars} characters)."))
    }
}

pub struct ListMcpServersTool;

#[async_trait]
impl BuiltinTool for ListMcpServersTool {
    fn name(&self) -> &'static str {
        "list_mcp_servers"
    }

    fn description(&self) -> &'static str {
        "List the configured tool servers with their transport, status, and tool counts."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, state: &BuiltinState) -> ToolResult {
        let servers = state.servers.list_servers().await;
        if servers.is_empty() {
            return ToolResult::success("No tool servers are configured.");
        }

        let mut out = String::new();
        for server in servers {
            out.push_str(&format!(
                "{} [{}] {} - {} tool(s){}\n",
                server.name,
                server.transport,
                server.status,
                server.tool_count,
                if server.enabled { "" } else { " (disabled)" },
            ));
        }
        ToolResult::success(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::test_support::builtins_in;

    #[tokio::test]
    async fn get_config_whole_and_section() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        let whole = builtins.execute("get_config", json!({})).await;
        assert!(!whole.is_error);
        assert!(whole.output.contains("enabledTools"));

        let section = builtins
            .execute("get_config", json!({"section": "agentSettings"}))
            .await;
        assert!(section.output.contains("loopLimit"));

        let bad = builtins
            .execute("get_config", json!({"section": "nope"}))
            .await;
        assert!(bad.is_error);
    }

    #[tokio::test]
    async fn update_config_section_persists() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        let result = builtins
            .execute(
                "update_config_section",
                json!({"section": "agentSettings", "values": {"loopLimit": 12}}),
            )
            .await;
        assert!(!result.is_error, "{}", result.output);

        let config = builtins.state().config.read().await;
        assert_eq!(config.agent_settings.loop_limit, 12);
        assert!(dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn partial_section_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        // displaySettings requires booleans; a wrongly-typed partial
        // replacement must not go through.
        let result = builtins
            .execute(
                "update_config_section",
                json!({"section": "displaySettings", "values": {"showMetrics": "yes"}}),
            )
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn system_prompt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        let empty = builtins.execute("get_system_prompt", json!({})).await;
        assert!(empty.output.contains("No custom system prompt"));

        builtins
            .execute("set_system_prompt", json!({"prompt": "Be terse."}))
            .await;
        let set = builtins.execute("get_system_prompt", json!({})).await;
        assert_eq!(set.output, "Be terse.");
    }

    #[tokio::test]
    async fn list_mcp_servers_with_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        let result = builtins.execute("list_mcp_servers", json!({})).await;
        assert!(result.output.contains("No tool servers"));
    }
}
