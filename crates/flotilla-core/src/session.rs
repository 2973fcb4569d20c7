//! The per-user session: the surface the UIs call.
//!
//! A session owns the model client, the tool registry, the built-in
//! state, and the server manager. `process_query` runs either the
//! delegation pipeline (planner → dispatcher → aggregator) or, when
//! delegation is disabled, a direct chat loop over the session
//! conversation. Operations on one session are serialized; distinct
//! sessions are independent.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::aggregator;
use crate::agent::dispatcher::{
    ConsecutiveFailurePolicy, Dispatcher, DispatcherConfig, EscalationPolicy, FallbackProvider,
    TaskOutcome, TaskRunner,
};
use crate::agent::events::AgentEvent;
use crate::agent::executor::{AgentExecutor, ExecutorServices};
use crate::agent::planner::{self, Task};
use crate::agent::roles::{AgentRole, AgentSpec, DIRECT_CHAT};
use crate::config::SessionConfig;
use crate::error::RuntimeError;
use crate::mcp::ServerManager;
use crate::model::{ChatMessage, ModelClient};
use crate::tools::registry::{ToolDescriptor, ToolOrigin};
use crate::tools::{BuiltinState, Builtins, ExecutionMode, ToolRegistry};
use crate::trace::TraceSink;

use async_trait::async_trait;

pub struct Session {
    working_dir: PathBuf,
    config: Arc<RwLock<SessionConfig>>,
    config_path: PathBuf,
    model: Arc<ModelClient>,
    registry: Arc<ToolRegistry>,
    servers: Arc<ServerManager>,
    builtins: Arc<Builtins>,
    mode: RwLock<ExecutionMode>,
    cancel: CancellationToken,
    /// Serializes the session's operations.
    op_gate: Mutex<()>,
    /// Direct-chat conversation history (query, reply).
    chat_history: Mutex<Vec<(String, String)>>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    escalation: Arc<dyn EscalationPolicy>,
}

impl Session {
    /// Create a session: connect enabled servers, build the catalog,
    /// and restore persisted tool enablement.
    pub async fn new(
        config: SessionConfig,
        config_path: PathBuf,
        working_dir: PathBuf,
        host: String,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(RwLock::new(config));
        let model = Arc::new(ModelClient::new(host));

        let servers = Arc::new(ServerManager::new(working_dir.clone()));
        {
            let config = config.read().await;
            servers.set_configs(config.mcp_servers.clone()).await;
        }
        servers.connect_all().await;

        let builtins = Arc::new(Builtins::new(Arc::new(BuiltinState::new(
            working_dir.clone(),
            Arc::clone(&config),
            config_path.clone(),
            Arc::clone(&servers),
        ))));

        let registry = Arc::new(ToolRegistry::new());
        registry.register_builtins(builtins.descriptors()).await;
        register_server_tools(&registry, &servers).await;

        {
            let config = config.read().await;
            registry
                .restore_disabled(&config.disabled_tools, &config.disabled_servers)
                .await;
            for (name, enabled) in &config.enabled_tools {
                registry.set_tool_enabled(name, *enabled).await;
            }
        }

        info!(working_dir = %working_dir.display(), "session ready");

        Ok(Self {
            working_dir,
            config,
            config_path,
            model,
            registry,
            servers,
            builtins,
            mode: RwLock::new(ExecutionMode::Act),
            cancel: CancellationToken::new(),
            op_gate: Mutex::new(()),
            chat_history: Mutex::new(Vec::new()),
            fallback: None,
            escalation: Arc::new(ConsecutiveFailurePolicy::default()),
        })
    }

    /// Inject the paid-model escalation target and its predicate.
    pub fn with_fallback(
        mut self,
        provider: Arc<dyn FallbackProvider>,
        policy: Arc<dyn EscalationPolicy>,
    ) -> Self {
        self.fallback = Some(provider);
        self.escalation = policy;
        self
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn model_name(&self) -> String {
        self.config.read().await.model.clone()
    }

    /// A point-in-time copy of the session configuration.
    pub async fn config_snapshot(&self) -> SessionConfig {
        self.config.read().await.clone()
    }

    pub async fn mode(&self) -> ExecutionMode {
        *self.mode.read().await
    }

    /// Session-level cancellation; checked at every suspension point of
    /// the running query.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Process one query to a final reply, emitting progress on the
    /// event channel as it goes.
    pub async fn process_query(
        &self,
        query: &str,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<String, RuntimeError> {
        let _gate = self.op_gate.lock().await;

        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let config = self.config.read().await.clone();
        let trace = Arc::new(TraceSink::new(
            config.effective_trace_level(),
            config.trace_dir(),
        ));

        let services = ExecutorServices {
            model: Arc::clone(&self.model),
            registry: Arc::clone(&self.registry),
            builtins: Arc::clone(&self.builtins),
            servers: Arc::clone(&self.servers),
            trace: Arc::clone(&trace),
            events: events.clone(),
        };

        let mode = *self.mode.read().await;

        let reply = if config.delegation.enabled {
            self.run_delegation(query, &config, mode, services, &events)
                .await
        } else {
            self.run_direct_chat(query, &config, mode, services).await
        };

        match &reply {
            Ok(text) => {
                if let Err(e) = trace.finish(query, text).await {
                    warn!("trace write failed: {e}");
                }
            }
            Err(e) => {
                trace.record_error(None, e.tag(), &e.to_string()).await;
                if let Err(we) = trace.finish(query, "").await {
                    warn!("trace write failed: {we}");
                }
            }
        }

        reply
    }

    /// The planner → dispatcher → aggregator pipeline. Delegated task
    /// histories are always fresh; `retainContext` does not apply here.
    async fn run_delegation(
        &self,
        query: &str,
        config: &SessionConfig,
        mode: ExecutionMode,
        services: ExecutorServices,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<String, RuntimeError> {
        let trace = Arc::clone(&services.trace);
        let model_name = config.model.clone();

        // Plan
        let planner_message = planner::build_planner_message(query, &self.working_dir);
        let planner_exec = AgentExecutor::new(
            services.clone(),
            &planner::PLANNER,
            mode,
            &model_name,
            false,
            self.cancel.child_token(),
            "planner",
        );
        let planner_outcome = planner_exec.run(&planner_message).await?;
        trace
            .record_planner(&planner_message, &planner_outcome.text)
            .await;

        let plan = planner::parse_plan(&planner_outcome.text, query)?;
        let _ = events.send(AgentEvent::PlanReady {
            task_count: plan.tasks.len(),
            rationale: plan.rationale.clone(),
        });

        // Schedule
        let runner = Arc::new(SpecialistRunner {
            services: services.clone(),
            mode,
            model_name: model_name.clone(),
            think: config.model_settings.thinking_mode,
            cancel: self.cancel.clone(),
        });
        let mut dispatcher = Dispatcher::new(
            runner,
            DispatcherConfig {
                max_parallel: config.delegation.max_parallel.max(1),
                task_timeout: std::time::Duration::from_secs(config.delegation.task_timeout_secs),
                ..Default::default()
            },
            Arc::clone(&trace),
            events.clone(),
            self.cancel.child_token(),
        );
        if let Some(fallback) = &self.fallback {
            dispatcher =
                dispatcher.with_fallback(Arc::clone(fallback), Arc::clone(&self.escalation));
        }
        let results = dispatcher.run(&plan).await;

        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        // Aggregate, with the partial results on failure paths too.
        let message = aggregator::build_aggregator_message(query, &results);
        let aggregator_exec = AgentExecutor::new(
            services,
            AgentRole::Aggregator.spec(),
            mode,
            &model_name,
            false,
            self.cancel.child_token(),
            "aggregator",
        );
        let reply = match aggregator_exec.run(&message).await {
            Ok(outcome) if !outcome.text.is_empty() => outcome.text,
            Ok(_) => aggregator::fallback_summary(&results),
            Err(RuntimeError::Cancelled) => return Err(RuntimeError::Cancelled),
            Err(e) => {
                warn!("aggregator failed ({e}); using mechanical summary");
                aggregator::fallback_summary(&results)
            }
        };

        Ok(reply)
    }

    /// Direct chat: one general agent over the session conversation.
    async fn run_direct_chat(
        &self,
        query: &str,
        config: &SessionConfig,
        mode: ExecutionMode,
        services: ExecutorServices,
    ) -> Result<String, RuntimeError> {
        let spec = AgentSpec {
            loop_limit: config.agent_settings.loop_limit,
            ..DIRECT_CHAT.clone()
        };

        let system_prompt = self
            .builtins
            .state()
            .system_prompt
            .read()
            .await
            .clone()
            .unwrap_or_else(|| DIRECT_CHAT.system_prompt.to_string());

        let mut messages = vec![ChatMessage::system(system_prompt)];
        if config.context_settings.retain_context {
            for (past_query, past_reply) in self.chat_history.lock().await.iter() {
                messages.push(ChatMessage::user(past_query));
                messages.push(ChatMessage::assistant(past_reply));
            }
        }
        messages.push(ChatMessage::user(query));

        let executor = AgentExecutor::new(
            services,
            &spec,
            mode,
            &config.model,
            config.model_settings.thinking_mode,
            self.cancel.child_token(),
            "chat",
        );
        let outcome = executor.run_conversation(messages).await?;

        self.chat_history
            .lock()
            .await
            .push((query.to_string(), outcome.text.clone()));

        Ok(outcome.text)
    }

    pub async fn set_model(&self, name: &str) {
        let _gate = self.op_gate.lock().await;
        let mut config = self.config.write().await;
        config.model = name.to_string();
        self.persist(&config);
    }

    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) {
        let _gate = self.op_gate.lock().await;
        self.registry.set_tool_enabled(name, enabled).await;

        let mut config = self.config.write().await;
        config.enabled_tools.insert(name.to_string(), enabled);
        config.disabled_tools = self.registry.disabled_tools().await;
        self.persist(&config);
    }

    pub async fn set_server_enabled(&self, name: &str, enabled: bool) {
        let _gate = self.op_gate.lock().await;
        self.registry.set_server_enabled(name, enabled).await;

        let mut config = self.config.write().await;
        config.disabled_servers = self.registry.disabled_servers().await;
        if let Some(server) = config.mcp_servers.get_mut(name) {
            server.enabled = Some(enabled);
            server.disabled = None;
        }
        self.persist(&config);
    }

    /// Flip between plan and act mode. Plan mode filters write-capable
    /// tools out of every agent's view.
    pub async fn toggle_mode(&self) -> ExecutionMode {
        let _gate = self.op_gate.lock().await;
        let mut mode = self.mode.write().await;
        *mode = mode.toggled();
        info!(mode = %*mode, "mode switched");
        *mode
    }

    /// Disconnect every server session and rebuild from the current
    /// catalog, keeping enablement for tools that still exist.
    pub async fn reload_servers(&self) {
        let _gate = self.op_gate.lock().await;
        {
            let config = self.config.read().await;
            self.servers.set_configs(config.mcp_servers.clone()).await;
        }
        self.servers.reload().await;
        register_server_tools(&self.registry, &self.servers).await;
        self.registry.prune_disabled().await;
        info!("server catalog reloaded");
    }

    /// Drop the direct-chat conversation history.
    pub async fn clear_context(&self) {
        self.chat_history.lock().await.clear();
    }

    /// Cancel in-flight work and tear down the transport sessions.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _gate = self.op_gate.lock().await;
        self.servers.close_all().await;
        info!("session closed");
    }

    fn persist(&self, config: &SessionConfig) {
        if let Err(e) = config.save(&self.config_path) {
            warn!("failed to persist config: {e}");
        }
    }
}

/// Register every connected server's tools under qualified names.
async fn register_server_tools(registry: &Arc<ToolRegistry>, servers: &Arc<ServerManager>) {
    use std::collections::HashMap;

    let mut by_server: HashMap<String, Vec<ToolDescriptor>> = HashMap::new();
    for (server, def) in servers.all_tools().await {
        let schema = if def.input_schema.is_null() {
            serde_json::json!({"type": "object"})
        } else {
            def.input_schema.clone()
        };
        by_server
            .entry(server.clone())
            .or_default()
            .push(ToolDescriptor {
                name: format!("{server}.{}", def.name),
                description: def.description.unwrap_or_else(|| "remote tool".to_string()),
                input_schema: schema,
                origin: ToolOrigin::Server(server),
            });
    }

    for (server, descriptors) in by_server {
        registry.register_server(&server, descriptors).await;
    }
}

/// Production task runner: one specialist agent invocation per task,
/// with a fresh history built from the task description verbatim.
struct SpecialistRunner {
    services: ExecutorServices,
    mode: ExecutionMode,
    model_name: String,
    think: bool,
    cancel: CancellationToken,
}

#[async_trait]
impl TaskRunner for SpecialistRunner {
    async fn run_task(&self, task: &Task, _attempt: usize) -> Result<TaskOutcome, RuntimeError> {
        let executor = AgentExecutor::new(
            self.services.clone(),
            task.role.spec(),
            self.mode,
            &self.model_name,
            self.think,
            self.cancel.child_token(),
            &task.id,
        );

        // Agents see the description only, never expected_output.
        let outcome = executor.run(&task.description).await?;
        Ok(TaskOutcome {
            text: outcome.text,
            tool_calls: outcome.tool_calls,
            loop_limit_hit: outcome.loop_limit_hit,
            eval_tokens: outcome.eval_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::LookupOutcome;

    async fn session_in(dir: &std::path::Path) -> Session {
        Session::new(
            SessionConfig::default(),
            dir.join("config.json"),
            dir.to_path_buf(),
            "http://localhost:11434".to_string(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn new_session_registers_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path()).await;

        assert!(matches!(
            session.registry().lookup("builtin.read_file").await,
            LookupOutcome::Found(_)
        ));
        assert_eq!(session.mode().await, ExecutionMode::Act);
    }

    #[tokio::test]
    async fn toggle_mode_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path()).await;

        assert_eq!(session.toggle_mode().await, ExecutionMode::Plan);
        assert_eq!(session.toggle_mode().await, ExecutionMode::Act);
    }

    #[tokio::test]
    async fn tool_toggle_persists_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path()).await;

        session.set_tool_enabled("builtin.read_file", false).await;
        assert!(matches!(
            session.registry().lookup("builtin.read_file").await,
            LookupOutcome::Disabled
        ));

        let saved = SessionConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(saved.enabled_tools.get("builtin.read_file"), Some(&false));
        assert!(saved
            .disabled_tools
            .contains(&"builtin.read_file".to_string()));

        session.set_tool_enabled("builtin.read_file", true).await;
        assert!(matches!(
            session.registry().lookup("builtin.read_file").await,
            LookupOutcome::Found(_)
        ));
    }

    #[tokio::test]
    async fn disabled_tools_restored_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::default();
        config.disabled_tools = vec!["builtin.execute_bash_command".to_string()];

        let session = Session::new(
            config,
            dir.path().join("config.json"),
            dir.path().to_path_buf(),
            "http://localhost:11434".to_string(),
        )
        .await
        .unwrap();

        assert!(matches!(
            session
                .registry()
                .lookup("builtin.execute_bash_command")
                .await,
            LookupOutcome::Disabled
        ));
    }

    #[tokio::test]
    async fn cancelled_session_refuses_queries() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path()).await;
        session.cancel();

        let (events, _rx) = mpsc::unbounded_channel();
        let err = session.process_query("hello", events).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled));
    }
}
