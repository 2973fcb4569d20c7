//! Per-session configuration.
//!
//! A JSON document with camelCase top-level keys, persisted in the
//! flotilla config directory and reloaded on session start. Server
//! descriptors are normalized (single `enabled` boolean) at load time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    config_dir, CONFIG_FILE, DEFAULT_LOOP_LIMIT, DEFAULT_MAX_PARALLEL, DEFAULT_MODEL,
    TASK_TIMEOUT_SECS,
};
use crate::mcp::ServerConfig;
use crate::trace::TraceLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub model: String,
    /// Explicit per-tool enablement decisions (name → enabled).
    pub enabled_tools: HashMap<String, bool>,
    pub disabled_tools: Vec<String>,
    pub disabled_servers: Vec<String>,
    pub context_settings: ContextSettings,
    pub model_settings: ModelSettings,
    pub agent_settings: AgentSettings,
    pub display_settings: DisplaySettings,
    pub delegation: DelegationSettings,
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            enabled_tools: HashMap::new(),
            disabled_tools: Vec::new(),
            disabled_servers: Vec::new(),
            context_settings: ContextSettings::default(),
            model_settings: ModelSettings::default(),
            agent_settings: AgentSettings::default(),
            display_settings: DisplaySettings::default(),
            delegation: DelegationSettings::default(),
            mcp_servers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Direct chat mode only: delegated runs always use fresh per-task
    /// histories regardless of this flag.
    pub retain_context: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            retain_context: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub thinking_mode: bool,
    pub show_thinking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub loop_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplaySettings {
    pub show_tool_execution: bool,
    pub show_metrics: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_tool_execution: true,
            show_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationSettings {
    pub enabled: bool,
    pub trace_enabled: bool,
    pub trace_level: TraceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
    pub max_parallel: usize,
    pub task_timeout_secs: u64,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trace_enabled: false,
            trace_level: TraceLevel::Basic,
            trace_dir: None,
            max_parallel: DEFAULT_MAX_PARALLEL,
            task_timeout_secs: TASK_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    pub fn default_path() -> PathBuf {
        config_dir().join(CONFIG_FILE)
    }

    /// Load from disk; a missing file yields the default config. Server
    /// descriptors are normalized as they come in.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: SessionConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        for server in config.mcp_servers.values_mut() {
            server.normalize();
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// One top-level section as JSON, or the whole document when no
    /// section is named.
    pub fn section(&self, name: Option<&str>) -> Result<Value, String> {
        let whole = serde_json::to_value(self).map_err(|e| e.to_string())?;
        match name {
            None => Ok(whole),
            Some(name) => whole
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unknown config section: {name}")),
        }
    }

    /// Replace one top-level section. The replacement must be a complete
    /// section value; partial updates fail deserialization.
    pub fn update_section(&mut self, name: &str, value: Value) -> Result<(), String> {
        let mut whole = serde_json::to_value(&*self).map_err(|e| e.to_string())?;
        let map = whole
            .as_object_mut()
            .ok_or_else(|| "config is not an object".to_string())?;

        if !map.contains_key(name) {
            return Err(format!("unknown config section: {name}"));
        }
        map.insert(name.to_string(), value);

        *self = serde_json::from_value(whole)
            .map_err(|e| format!("section '{name}' rejected: {e}"))?;
        Ok(())
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.delegation
            .trace_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("traces"))
    }

    pub fn effective_trace_level(&self) -> TraceLevel {
        if self.delegation.trace_enabled {
            self.delegation.trace_level
        } else {
            TraceLevel::Off
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_json() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, DEFAULT_MODEL);
        assert_eq!(back.agent_settings.loop_limit, DEFAULT_LOOP_LIMIT);
        assert!(back.context_settings.retain_context);
    }

    #[test]
    fn camel_case_keys_on_the_wire() {
        let json = serde_json::to_value(SessionConfig::default()).unwrap();
        assert!(json.get("enabledTools").is_some());
        assert!(json.get("contextSettings").is_some());
        assert!(json["contextSettings"].get("retainContext").is_some());
        assert!(json["modelSettings"].get("thinkingMode").is_some());
        assert!(json["agentSettings"].get("loopLimit").is_some());
        assert!(json["displaySettings"].get("showToolExecution").is_some());
        // delegation keys stay snake_case
        assert!(json["delegation"].get("trace_enabled").is_some());
        assert!(json.get("mcpServers").is_some());
    }

    #[test]
    fn load_normalizes_server_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"mcpServers": {"x": {"url": "http://h/mcp", "disabled": true}}}"#,
        )
        .unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.mcp_servers["x"].enabled, Some(false));
        assert_eq!(config.mcp_servers["x"].disabled, None);
    }

    #[test]
    fn missing_file_yields_default() {
        let config = SessionConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn section_access_and_complete_update() {
        let mut config = SessionConfig::default();

        let section = config.section(Some("agentSettings")).unwrap();
        assert_eq!(section["loopLimit"], DEFAULT_LOOP_LIMIT as u64);

        config
            .update_section("agentSettings", serde_json::json!({"loopLimit": 9}))
            .unwrap();
        assert_eq!(config.agent_settings.loop_limit, 9);

        assert!(config.section(Some("noSuchSection")).is_err());
        assert!(config
            .update_section("noSuchSection", serde_json::json!({}))
            .is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = SessionConfig::default();
        config.model = "llama3.3:70b".to_string();
        config.save(&path).unwrap();

        let back = SessionConfig::load(&path).unwrap();
        assert_eq!(back.model, "llama3.3:70b");
    }

    #[test]
    fn trace_level_requires_trace_enabled() {
        let mut config = SessionConfig::default();
        assert_eq!(config.effective_trace_level(), TraceLevel::Off);
        config.delegation.trace_enabled = true;
        assert_eq!(config.effective_trace_level(), TraceLevel::Basic);
    }
}
