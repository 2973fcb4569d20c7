//! Server manager: connection lifecycle over the configured catalog.
//!
//! Holds one session per enabled server and routes qualified tool calls
//! to the session bound to the server at dispatch time. `reload` tears
//! every session down and rebuilds from the current catalog.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{RuntimeError, ToolCallError};

use super::config::{expand_config, ServerConfig, TransportKind};
use super::http::HttpSession;
use super::protocol::RemoteToolDef;
use super::session::{SessionStatus, ToolServerSession};
use super::transport::StdioSession;

/// Catalog entry summary for UIs and the `list_mcp_servers` builtin.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub transport: String,
    pub enabled: bool,
    pub status: String,
    pub tool_count: usize,
}

pub struct ServerManager {
    working_dir: PathBuf,
    configs: RwLock<HashMap<String, ServerConfig>>,
    sessions: RwLock<HashMap<String, Arc<dyn ToolServerSession>>>,
    /// Tool listings captured at connect time, keyed by server.
    listings: RwLock<HashMap<String, Vec<RemoteToolDef>>>,
}

impl ServerManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            configs: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            listings: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the server catalog. Descriptors are normalized; existing
    /// sessions are untouched until `connect_all` or `reload`.
    pub async fn set_configs(&self, configs: HashMap<String, ServerConfig>) {
        let mut normalized = HashMap::new();
        for (name, mut config) in configs {
            config.normalize();
            normalized.insert(name, config);
        }
        *self.configs.write().await = normalized;
    }

    pub async fn configs(&self) -> HashMap<String, ServerConfig> {
        self.configs.read().await.clone()
    }

    /// Connect every enabled server in parallel. Individual failures are
    /// logged and skipped; a session with no servers is still usable.
    pub async fn connect_all(&self) {
        let configs: Vec<(String, ServerConfig)> = {
            let configs = self.configs.read().await;
            configs
                .iter()
                .filter(|(_, c)| c.is_enabled())
                .map(|(n, c)| (n.clone(), c.clone()))
                .collect()
        };

        if configs.is_empty() {
            return;
        }

        info!(count = configs.len(), "connecting tool servers");
        let connects = configs
            .iter()
            .map(|(name, _)| async move { (name.clone(), self.connect(name).await) });
        for (name, result) in futures::future::join_all(connects).await {
            if let Err(e) = result {
                warn!(server = %name, "connect failed: {e}");
            }
        }
    }

    /// Connect one server, replacing any existing session for it.
    pub async fn connect(&self, name: &str) -> Result<(), RuntimeError> {
        let config = self
            .configs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::TransportConfig(format!("unknown server: {name}")))?;

        if !config.is_enabled() {
            return Err(RuntimeError::TransportConfig(format!(
                "server '{name}' is disabled"
            )));
        }

        self.disconnect(name).await;

        let config = expand_config(&config);
        let kind = config.kind(name)?;
        let session: Arc<dyn ToolServerSession> = match kind {
            TransportKind::Stdio => {
                let command = config.command.as_deref().unwrap_or_default();
                Arc::new(
                    StdioSession::connect(name, command, &config.args, &config.env, &self.working_dir)
                        .await?,
                )
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let url = config.url.as_deref().unwrap_or_default();
                Arc::new(HttpSession::connect(name, url, &config.headers, kind).await?)
            }
        };

        let tools = session
            .list_tools()
            .await
            .map_err(|e| RuntimeError::TransportConfig(format!("server '{name}': {e}")))?;

        info!(server = name, tools = tools.len(), "server connected");
        self.listings
            .write()
            .await
            .insert(name.to_string(), tools);
        self.sessions
            .write()
            .await
            .insert(name.to_string(), session);
        Ok(())
    }

    pub async fn disconnect(&self, name: &str) {
        let session = self.sessions.write().await.remove(name);
        self.listings.write().await.remove(name);
        if let Some(session) = session {
            session.close().await;
            info!(server = name, "server disconnected");
        }
    }

    /// Tear down every session and rebuild from the current catalog.
    pub async fn reload(&self) {
        self.close_all().await;
        self.connect_all().await;
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Arc<dyn ToolServerSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        self.listings.write().await.clear();
        for session in sessions {
            session.close().await;
        }
    }

    /// All tools from connected servers, as (server, definition) pairs.
    pub async fn all_tools(&self) -> Vec<(String, RemoteToolDef)> {
        let listings = self.listings.read().await;
        let mut tools = Vec::new();
        for (server, defs) in listings.iter() {
            for def in defs {
                tools.push((server.clone(), def.clone()));
            }
        }
        tools
    }

    /// Route a call to the server's session.
    pub async fn call_tool(
        &self,
        server: &str,
        op: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(server).cloned()
        };
        let Some(session) = session else {
            return Err(ToolCallError::Transport(format!(
                "server not connected: {server}"
            )));
        };
        session.call_tool(op, args, cancel).await
    }

    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let configs = self.configs.read().await;
        let sessions = self.sessions.read().await;
        let listings = self.listings.read().await;

        let mut servers: Vec<ServerInfo> = configs
            .iter()
            .map(|(name, config)| {
                let status = sessions
                    .get(name)
                    .map(|s| s.status())
                    .unwrap_or(SessionStatus::Closed);
                ServerInfo {
                    name: name.clone(),
                    transport: config
                        .kind(name)
                        .map(|k| k.to_string())
                        .unwrap_or_else(|_| "invalid".to_string()),
                    enabled: config.is_enabled(),
                    status: status.to_string(),
                    tool_count: listings.get(name).map(Vec::len).unwrap_or(0),
                }
            })
            .collect();

        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn has_servers(&self) -> bool {
        !self.configs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_is_normalized_on_set() {
        let manager = ServerManager::new(std::env::temp_dir());
        let mut configs = HashMap::new();
        let mut server = ServerConfig::remote("http://x/mcp", TransportKind::StreamableHttp);
        server.disabled = Some(true);
        configs.insert("x".to_string(), server);

        manager.set_configs(configs).await;
        let stored = manager.configs().await;
        assert_eq!(stored["x"].enabled, Some(false));
        assert_eq!(stored["x"].disabled, None);
    }

    #[tokio::test]
    async fn call_to_unconnected_server_is_transport_error() {
        let manager = ServerManager::new(std::env::temp_dir());
        let cancel = CancellationToken::new();
        let err = manager
            .call_tool("ghost", "op", serde_json::json!({}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolCallError::Transport(_)));
    }

    #[tokio::test]
    async fn list_servers_reports_disconnected_status() {
        let manager = ServerManager::new(std::env::temp_dir());
        let mut configs = HashMap::new();
        configs.insert(
            "remote".to_string(),
            ServerConfig::remote("http://x/sse", TransportKind::Sse),
        );
        manager.set_configs(configs).await;

        let servers = manager.list_servers().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].status, "closed");
        assert_eq!(servers[0].transport, "sse");
        assert!(servers[0].enabled);
    }
}
