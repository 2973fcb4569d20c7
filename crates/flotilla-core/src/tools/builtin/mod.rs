//! In-process tools, exposed under the `builtin.` prefix.
//!
//! Tools that mutate session-wide state (config, system prompt, memory)
//! do so through one `BuiltinState` value owned by the session; there
//! are no process-global singletons. Every failure path returns a
//! descriptive string to the model; built-ins never propagate errors.

pub mod exec;
pub mod fs;
pub mod memory;
pub mod paths;
pub mod settings;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::SessionConfig;
use crate::mcp::ServerManager;
use crate::tools::registry::{ToolDescriptor, ToolOrigin, ToolResult};

pub use memory::MemoryState;

/// Session-owned state shared by the built-in tools.
pub struct BuiltinState {
    pub working_dir: PathBuf,
    /// Internal-only escape hatch for absolute paths outside the
    /// working directory. Never exposed to the model.
    pub allow_absolute: AtomicBool,
    pub system_prompt: RwLock<Option<String>>,
    pub memory: Mutex<MemoryState>,
    pub config: Arc<RwLock<SessionConfig>>,
    pub config_path: PathBuf,
    pub servers: Arc<ServerManager>,
    /// Same-path filesystem writes are serialized through these.
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl BuiltinState {
    pub fn new(
        working_dir: PathBuf,
        config: Arc<RwLock<SessionConfig>>,
        config_path: PathBuf,
        servers: Arc<ServerManager>,
    ) -> Self {
        Self {
            working_dir,
            allow_absolute: AtomicBool::new(false),
            system_prompt: RwLock::new(None),
            memory: Mutex::new(MemoryState::default()),
            config,
            config_path,
            servers,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write lock for one resolved path.
    pub async fn lock_path(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            Arc::clone(
                locks
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

/// One built-in operation. Names are unqualified here; the registry
/// sees them as `builtin.<name>`.
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult;
}

/// The built-in tool set, dispatchable by operation name.
pub struct Builtins {
    state: Arc<BuiltinState>,
    tools: HashMap<&'static str, Arc<dyn BuiltinTool>>,
}

impl Builtins {
    pub fn new(state: Arc<BuiltinState>) -> Self {
        let all: Vec<Arc<dyn BuiltinTool>> = vec![
            Arc::new(fs::ReadFileTool),
            Arc::new(fs::WriteFileTool),
            Arc::new(fs::PatchFileTool),
            Arc::new(fs::CreateDirectoryTool),
            Arc::new(fs::DeleteFileTool),
            Arc::new(fs::ListFilesTool),
            Arc::new(fs::ListDirectoriesTool),
            Arc::new(fs::FileExistsTool),
            Arc::new(fs::GetFileInfoTool),
            Arc::new(paths::ValidateFilePathTool),
            Arc::new(exec::ExecuteBashCommandTool),
            Arc::new(exec::ExecutePythonCodeTool),
            Arc::new(exec::RunPytestTool),
            Arc::new(settings::GetConfigTool),
            Arc::new(settings::UpdateConfigSectionTool),
            Arc::new(settings::GetSystemPromptTool),
            Arc::new(settings::SetSystemPromptTool),
            Arc::new(settings::ListMcpServersTool),
            Arc::new(memory::GetMemoryStateTool),
            Arc::new(memory::GetFeatureDetailsTool),
            Arc::new(memory::GetGoalDetailsTool),
            Arc::new(memory::UpdateFeatureStatusTool),
            Arc::new(memory::LogProgressTool),
            Arc::new(memory::AddTestResultTool),
        ];

        let mut tools = HashMap::new();
        for tool in all {
            tools.insert(tool.name(), tool);
        }

        Self { state, tools }
    }

    pub fn state(&self) -> &Arc<BuiltinState> {
        &self.state
    }

    /// Registry descriptors for every built-in, qualified names included.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: format!("builtin.{}", tool.name()),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
                origin: ToolOrigin::Builtin,
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Execute one operation. Accepts either the bare operation name or
    /// the qualified `builtin.` form.
    pub async fn execute(&self, op: &str, args: Value) -> ToolResult {
        let op = op.strip_prefix("builtin.").unwrap_or(op);
        match self.tools.get(op) {
            Some(tool) => tool.execute(args, &self.state).await,
            None => ToolResult::error(format!("Unknown built-in tool: {op}")),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_operation_is_a_tool_error_not_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = test_support::builtins_in(dir.path()).await;

        let result = builtins.execute("no_such_tool", Value::Null).await;
        assert!(result.is_error);
        assert!(result.output.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn descriptors_are_qualified_and_cover_the_surface() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = test_support::builtins_in(dir.path()).await;
        let names: Vec<String> = builtins.descriptors().into_iter().map(|d| d.name).collect();

        for expected in [
            "builtin.read_file",
            "builtin.write_file",
            "builtin.patch_file",
            "builtin.create_directory",
            "builtin.delete_file",
            "builtin.list_files",
            "builtin.list_directories",
            "builtin.file_exists",
            "builtin.get_file_info",
            "builtin.validate_file_path",
            "builtin.execute_bash_command",
            "builtin.execute_python_code",
            "builtin.run_pytest",
            "builtin.get_config",
            "builtin.update_config_section",
            "builtin.get_system_prompt",
            "builtin.set_system_prompt",
            "builtin.list_mcp_servers",
            "builtin.get_memory_state",
            "builtin.get_feature_details",
            "builtin.get_goal_details",
            "builtin.update_feature_status",
            "builtin.log_progress",
            "builtin.add_test_result",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }
}
