//! Server descriptors.
//!
//! One serde shape covers both transport families: child-process servers
//! carry `command`/`args`/`env`, HTTP-class servers carry `url`/`headers`
//! plus a `transport` (or legacy `type`) tag. Configs may flag themselves
//! off with either `disabled: true` or `enabled: false`; `normalize`
//! folds the pair into a single boolean at load time, with `disabled`
//! winning when both are present.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    /// Legacy tag accepted on read (`"sse"`, `"streamable_http"`, `"url"`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl ServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn remote(url: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            url: Some(url.into()),
            transport: Some(transport),
            ..Default::default()
        }
    }

    /// Whether this server participates in the session. If both flags are
    /// absent the server is enabled.
    pub fn is_enabled(&self) -> bool {
        if self.disabled == Some(true) {
            return false;
        }
        self.enabled.unwrap_or(true)
    }

    /// Fold `enabled`/`disabled` into the single `enabled` boolean.
    pub fn normalize(&mut self) {
        self.enabled = Some(self.is_enabled());
        self.disabled = None;
    }

    /// Resolve the transport kind, validating the descriptor.
    pub fn kind(&self, name: &str) -> Result<TransportKind, RuntimeError> {
        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err(RuntimeError::TransportConfig(format!(
                    "server '{name}' has an empty command"
                )));
            }
            return Ok(TransportKind::Stdio);
        }

        let Some(url) = &self.url else {
            return Err(RuntimeError::TransportConfig(format!(
                "server '{name}' declares neither command nor url"
            )));
        };

        if let Some(kind) = self.transport {
            return Ok(kind);
        }

        match self.server_type.as_deref() {
            Some("sse") => Ok(TransportKind::Sse),
            Some("streamable_http") => Ok(TransportKind::StreamableHttp),
            Some("stdio" | "script") => Err(RuntimeError::TransportConfig(format!(
                "server '{name}' is tagged {} but has no command",
                self.server_type.as_deref().unwrap_or_default()
            ))),
            // Untagged URL servers: an /sse suffix picks the event-stream
            // transport, anything else streams over POST.
            Some("url") | None => {
                if url.trim_end_matches('/').ends_with("/sse") {
                    Ok(TransportKind::Sse)
                } else {
                    Ok(TransportKind::StreamableHttp)
                }
            }
            Some(other) => Err(RuntimeError::TransportConfig(format!(
                "server '{name}' has unknown transport '{other}'"
            ))),
        }
    }
}

/// Expand `${VAR}` references from the process environment. Unknown
/// variables expand to the empty string.
pub fn expand_env(value: &str) -> String {
    let mut result = value.to_string();

    while let Some(start) = result.find("${") {
        let Some(end_offset) = result[start..].find('}') else {
            break;
        };
        let end = start + end_offset;
        let var_name = result[start + 2..end].to_string();
        let replacement = std::env::var(&var_name).unwrap_or_default();
        result.replace_range(start..=end, &replacement);
    }

    result
}

/// Apply environment expansion to a descriptor's env map and headers.
pub fn expand_config(config: &ServerConfig) -> ServerConfig {
    let mut expanded = config.clone();
    expanded.env = config
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_env(v)))
        .collect();
    expanded.headers = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env(v)))
        .collect();
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_local_server() {
        let json = r#"{"command": "uvx", "args": ["some-mcp", "-y"], "env": {"API_KEY": "test"}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind("local").unwrap(), TransportKind::Stdio);
        assert!(config.is_enabled());
    }

    #[test]
    fn parse_remote_server_with_type_tag() {
        let json = r#"{"type": "sse", "url": "http://localhost:8000/events"}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind("remote").unwrap(), TransportKind::Sse);
    }

    #[test]
    fn untagged_url_defaults_by_suffix() {
        let sse: ServerConfig =
            serde_json::from_str(r#"{"url": "http://localhost:8000/sse"}"#).unwrap();
        assert_eq!(sse.kind("a").unwrap(), TransportKind::Sse);

        let http: ServerConfig =
            serde_json::from_str(r#"{"url": "http://localhost:8000/mcp"}"#).unwrap();
        assert_eq!(http.kind("b").unwrap(), TransportKind::StreamableHttp);
    }

    #[test]
    fn enable_flags_normalize_to_one_boolean() {
        let mut disabled: ServerConfig =
            serde_json::from_str(r#"{"url": "http://x/mcp", "disabled": true}"#).unwrap();
        assert!(!disabled.is_enabled());
        disabled.normalize();
        assert_eq!(disabled.enabled, Some(false));
        assert_eq!(disabled.disabled, None);

        let off: ServerConfig =
            serde_json::from_str(r#"{"url": "http://x/mcp", "enabled": false}"#).unwrap();
        assert!(!off.is_enabled());

        // disabled wins when both flags are present
        let conflict: ServerConfig =
            serde_json::from_str(r#"{"url": "http://x/mcp", "enabled": true, "disabled": true}"#)
                .unwrap();
        assert!(!conflict.is_enabled());

        let default: ServerConfig = serde_json::from_str(r#"{"url": "http://x/mcp"}"#).unwrap();
        assert!(default.is_enabled());
    }

    #[test]
    fn descriptor_without_command_or_url_is_invalid() {
        let config = ServerConfig::default();
        assert!(matches!(
            config.kind("broken"),
            Err(RuntimeError::TransportConfig(_))
        ));
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("FLOTILLA_TEST_TOKEN", "sekrit");
        assert_eq!(expand_env("Bearer ${FLOTILLA_TEST_TOKEN}"), "Bearer sekrit");
        assert_eq!(expand_env("${FLOTILLA_TEST_MISSING_VAR}"), "");
        assert_eq!(expand_env("plain"), "plain");
    }
}
