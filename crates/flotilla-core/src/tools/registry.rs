//! Tool registry: the merged catalog of callable tools.
//!
//! Holds descriptors for built-ins and for every connected server's
//! tools, plus the session's disabled-tool and disabled-server sets.
//! Enablement changes apply on the next lookup. Reads take the reader
//! lock; mutation takes the writer lock.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::ToolDef;

/// Plan mode filters write-capable built-ins out of the active view;
/// act mode exposes everything enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Plan,
    #[default]
    Act,
}

impl ExecutionMode {
    pub fn toggled(self) -> Self {
        match self {
            ExecutionMode::Plan => ExecutionMode::Act,
            ExecutionMode::Act => ExecutionMode::Plan,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Plan => write!(f, "plan"),
            ExecutionMode::Act => write!(f, "act"),
        }
    }
}

/// The closed set of write-capable built-ins excluded in plan mode.
pub const WRITE_TOOLS: &[&str] = &[
    "builtin.write_file",
    "builtin.patch_file",
    "builtin.delete_file",
    "builtin.create_directory",
    "builtin.execute_bash_command",
    "builtin.execute_python_code",
    "builtin.set_system_prompt",
];

/// Outcome of a tool execution, handed back to the model as a tool-role
/// message. Failures are descriptive strings, never exceptions.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: format!("Error: {msg}"),
            is_error: true,
        }
    }
}

/// Where a tool's calls are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    Server(String),
}

/// One entry in the catalog. The name is fully qualified
/// (`server.operation`, with `builtin` as the server for in-process
/// tools) and unique within the catalog.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub origin: ToolOrigin,
}

impl From<&ToolDescriptor> for ToolDef {
    fn from(descriptor: &ToolDescriptor) -> Self {
        ToolDef {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
        }
    }
}

/// Result of resolving a qualified name at dispatch time.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Found(ToolDescriptor),
    /// The tool exists but it, or its server, is disabled.
    Disabled,
    NotFound,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
    disabled_tools: RwLock<HashSet<String>>,
    disabled_servers: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_builtins(&self, descriptors: Vec<ToolDescriptor>) {
        let mut tools = self.tools.write().await;
        for descriptor in descriptors {
            tools.insert(descriptor.name.clone(), descriptor);
        }
    }

    /// Register a server's tools under `server.` qualified names,
    /// replacing any previous registration for that server.
    pub async fn register_server(&self, server: &str, descriptors: Vec<ToolDescriptor>) {
        let mut tools = self.tools.write().await;
        tools.retain(|_, d| d.origin != ToolOrigin::Server(server.to_string()));
        for descriptor in descriptors {
            tools.insert(descriptor.name.clone(), descriptor);
        }
    }

    /// Remove a server and its tools. Idempotent.
    pub async fn unregister_server(&self, server: &str) {
        let mut tools = self.tools.write().await;
        tools.retain(|_, d| d.origin != ToolOrigin::Server(server.to_string()));
    }

    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) {
        let mut disabled = self.disabled_tools.write().await;
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_string());
        }
    }

    pub async fn set_server_enabled(&self, name: &str, enabled: bool) {
        let mut disabled = self.disabled_servers.write().await;
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_string());
        }
    }

    pub async fn disabled_tools(&self) -> Vec<String> {
        let mut list: Vec<String> = self.disabled_tools.read().await.iter().cloned().collect();
        list.sort();
        list
    }

    pub async fn disabled_servers(&self) -> Vec<String> {
        let mut list: Vec<String> = self.disabled_servers.read().await.iter().cloned().collect();
        list.sort();
        list
    }

    /// Restore persisted enablement state.
    pub async fn restore_disabled(&self, tools: &[String], servers: &[String]) {
        *self.disabled_tools.write().await = tools.iter().cloned().collect();
        *self.disabled_servers.write().await = servers.iter().cloned().collect();
    }

    /// Drop disabled-tool entries for tools that no longer exist. Run
    /// after a server reload so stale names don't accumulate.
    pub async fn prune_disabled(&self) {
        let tools = self.tools.read().await;
        self.disabled_tools
            .write()
            .await
            .retain(|name| tools.contains_key(name));
    }

    /// The subset visible to the model: excludes tools whose server is
    /// disabled, individually disabled tools, and in plan mode the
    /// write-capable built-ins.
    pub async fn active_tools(&self, mode: ExecutionMode) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().await;
        let disabled_tools = self.disabled_tools.read().await;
        let disabled_servers = self.disabled_servers.read().await;

        let mut active: Vec<ToolDescriptor> = tools
            .values()
            .filter(|d| !disabled_tools.contains(&d.name))
            .filter(|d| match &d.origin {
                ToolOrigin::Builtin => !disabled_servers.contains("builtin"),
                ToolOrigin::Server(server) => !disabled_servers.contains(server),
            })
            .filter(|d| mode == ExecutionMode::Act || !WRITE_TOOLS.contains(&d.name.as_str()))
            .cloned()
            .collect();

        active.sort_by(|a, b| a.name.cmp(&b.name));
        active
    }

    pub async fn lookup(&self, name: &str) -> LookupOutcome {
        let tools = self.tools.read().await;
        let Some(descriptor) = tools.get(name) else {
            return LookupOutcome::NotFound;
        };

        if self.disabled_tools.read().await.contains(name) {
            return LookupOutcome::Disabled;
        }

        let server = match &descriptor.origin {
            ToolOrigin::Builtin => "builtin",
            ToolOrigin::Server(server) => server.as_str(),
        };
        if self.disabled_servers.read().await.contains(server) {
            return LookupOutcome::Disabled;
        }

        LookupOutcome::Found(descriptor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, origin: ToolOrigin) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
            origin,
        }
    }

    async fn sample_registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register_builtins(vec![
                descriptor("builtin.read_file", ToolOrigin::Builtin),
                descriptor("builtin.write_file", ToolOrigin::Builtin),
                descriptor("builtin.execute_bash_command", ToolOrigin::Builtin),
            ])
            .await;
        registry
            .register_server(
                "pdf",
                vec![descriptor("pdf.lookup", ToolOrigin::Server("pdf".into()))],
            )
            .await;
        registry
    }

    #[tokio::test]
    async fn plan_mode_excludes_write_tools() {
        let registry = sample_registry().await;

        let act: Vec<String> = registry
            .active_tools(ExecutionMode::Act)
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(act.contains(&"builtin.write_file".to_string()));
        assert!(act.contains(&"builtin.execute_bash_command".to_string()));

        let plan: Vec<String> = registry
            .active_tools(ExecutionMode::Plan)
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(!plan.contains(&"builtin.write_file".to_string()));
        assert!(!plan.contains(&"builtin.execute_bash_command".to_string()));
        assert!(plan.contains(&"builtin.read_file".to_string()));
        assert!(plan.contains(&"pdf.lookup".to_string()));
    }

    #[tokio::test]
    async fn disabled_server_hides_its_tools() {
        let registry = sample_registry().await;
        registry.set_server_enabled("pdf", false).await;

        let active = registry.active_tools(ExecutionMode::Act).await;
        assert!(!active.iter().any(|d| d.name == "pdf.lookup"));
        assert!(matches!(
            registry.lookup("pdf.lookup").await,
            LookupOutcome::Disabled
        ));

        registry.set_server_enabled("pdf", true).await;
        assert!(matches!(
            registry.lookup("pdf.lookup").await,
            LookupOutcome::Found(_)
        ));
    }

    #[tokio::test]
    async fn lookup_distinguishes_missing_from_disabled() {
        let registry = sample_registry().await;
        registry.set_tool_enabled("builtin.read_file", false).await;

        assert!(matches!(
            registry.lookup("builtin.read_file").await,
            LookupOutcome::Disabled
        ));
        assert!(matches!(
            registry.lookup("builtin.no_such_tool").await,
            LookupOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn reregistering_a_server_replaces_its_tools() {
        let registry = sample_registry().await;
        registry
            .register_server(
                "pdf",
                vec![descriptor("pdf.extract", ToolOrigin::Server("pdf".into()))],
            )
            .await;

        assert!(matches!(
            registry.lookup("pdf.lookup").await,
            LookupOutcome::NotFound
        ));
        assert!(matches!(
            registry.lookup("pdf.extract").await,
            LookupOutcome::Found(_)
        ));
    }

    #[tokio::test]
    async fn prune_drops_stale_disabled_entries() {
        let registry = sample_registry().await;
        registry.set_tool_enabled("pdf.lookup", false).await;
        registry.unregister_server("pdf").await;
        registry.prune_disabled().await;

        assert!(registry.disabled_tools().await.is_empty());
    }
}
