//! Server catalog sources: `--servers-json` files, per-script and
//! per-URL CLI flags, and auto-discovery from the user's canonical
//! desktop-assistant config.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants::canonical_client_config;
use crate::error::RuntimeError;

use super::config::{ServerConfig, TransportKind};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServersFile {
    #[serde(default)]
    mcp_servers: HashMap<String, ServerConfig>,
}

/// Load a `{"mcpServers": {...}}` document (a bare server map is also
/// accepted).
pub fn load_servers_file(path: &Path) -> Result<HashMap<String, ServerConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if let Ok(file) = serde_json::from_str::<ServersFile>(&content) {
        if !file.mcp_servers.is_empty() {
            return Ok(file.mcp_servers);
        }
    }

    serde_json::from_str::<HashMap<String, ServerConfig>>(&content)
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Import servers from the canonical client config, if present.
pub fn discover_servers() -> Result<HashMap<String, ServerConfig>> {
    let path = canonical_client_config();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no canonical client config found");
        return Ok(HashMap::new());
    }
    let servers = load_servers_file(&path)?;
    tracing::info!(
        count = servers.len(),
        path = %path.display(),
        "auto-discovered servers"
    );
    Ok(servers)
}

/// Build a stdio server descriptor from a server script path. `.py`
/// scripts run under python3, `.js` under node, anything else is
/// executed directly.
pub fn server_from_script(path: &str) -> Result<(String, ServerConfig), RuntimeError> {
    let script = Path::new(path);
    let name = script
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            RuntimeError::TransportConfig(format!("cannot derive a server name from '{path}'"))
        })?
        .to_string();

    let config = match script.extension().and_then(|e| e.to_str()) {
        Some("py") => ServerConfig::stdio("python3", vec![path.to_string()]),
        Some("js") => ServerConfig::stdio("node", vec![path.to_string()]),
        _ => ServerConfig::stdio(path, Vec::new()),
    };

    Ok((name, config))
}

/// Build an HTTP-class descriptor from a URL flag. The transport is
/// picked by the `/sse` suffix convention; the name derives from the
/// host.
pub fn server_from_url(url: &str) -> Result<(String, ServerConfig), RuntimeError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| RuntimeError::TransportConfig(format!("bad server url '{url}': {e}")))?;

    let name = parsed
        .host_str()
        .map(|h| h.replace('.', "-"))
        .unwrap_or_else(|| "remote".to_string());

    let kind = if url.trim_end_matches('/').ends_with("/sse") {
        TransportKind::Sse
    } else {
        TransportKind::StreamableHttp
    };

    Ok((name, ServerConfig::remote(url, kind)))
}
