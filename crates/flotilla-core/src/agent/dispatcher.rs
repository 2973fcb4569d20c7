//! The scheduler: runs a validated plan to completion.
//!
//! Tasks become runnable when every dependency is terminal; runnable
//! tasks execute concurrently up to `max_parallel`. Recoverable failures
//! (transport, timeouts) are retried up to a small bound, then optionally
//! escalated to an injected fallback provider under a pluggable
//! predicate. A task whose ancestor failed is skipped unless the
//! ancestor retained a partial result and the dependent's role accepts
//! partial input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::constants::{DEFAULT_MAX_PARALLEL, MAX_TASK_RETRIES, TASK_TIMEOUT_SECS};
use crate::error::RuntimeError;
use crate::trace::TraceSink;

use super::events::AgentEvent;
use super::executor::ToolCallRecord;
use super::planner::{Plan, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Failed,
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Ok => write!(f, "ok"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal record for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub output_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub elapsed_ms: u128,
    pub attempts: usize,
    /// A retained-but-incomplete result (loop limit hit). Dependents
    /// whose role accepts partial ancestors may still run on it.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one agent invocation produced for its task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub loop_limit_hit: bool,
    pub eval_tokens: u64,
}

/// Executes one task attempt. The production implementation wraps the
/// agent executor; tests substitute stubs.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &Task, attempt: usize) -> Result<TaskOutcome, RuntimeError>;
}

/// Escalation target for tasks the local model keeps failing.
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    async fn run_task(&self, task: &Task) -> Result<TaskOutcome, RuntimeError>;
}

/// Decides when a failing task is re-dispatched to the fallback.
pub trait EscalationPolicy: Send + Sync {
    fn should_escalate(&self, task: &Task, consecutive_failures: usize) -> bool;
}

/// Default policy: escalate any task after N consecutive failures.
pub struct ConsecutiveFailurePolicy {
    pub threshold: usize,
}

impl Default for ConsecutiveFailurePolicy {
    fn default() -> Self {
        Self { threshold: 2 }
    }
}

impl EscalationPolicy for ConsecutiveFailurePolicy {
    fn should_escalate(&self, _task: &Task, consecutive_failures: usize) -> bool {
        consecutive_failures >= self.threshold
    }
}

#[derive(Clone)]
pub struct DispatcherConfig {
    pub max_parallel: usize,
    pub max_retries: usize,
    pub task_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_retries: MAX_TASK_RETRIES,
            task_timeout: Duration::from_secs(TASK_TIMEOUT_SECS),
        }
    }
}

pub struct Dispatcher {
    runner: Arc<dyn TaskRunner>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    escalation: Arc<dyn EscalationPolicy>,
    config: DispatcherConfig,
    trace: Arc<TraceSink>,
    events: mpsc::UnboundedSender<AgentEvent>,
    cancel: CancellationToken,
}

enum TaskState {
    Pending,
    Running,
    Done(TaskResult),
}

impl Dispatcher {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        config: DispatcherConfig,
        trace: Arc<TraceSink>,
        events: mpsc::UnboundedSender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            fallback: None,
            escalation: Arc::new(ConsecutiveFailurePolicy::default()),
            config,
            trace,
            events,
            cancel,
        }
    }

    pub fn with_fallback(
        mut self,
        provider: Arc<dyn FallbackProvider>,
        policy: Arc<dyn EscalationPolicy>,
    ) -> Self {
        self.fallback = Some(provider);
        self.escalation = policy;
        self
    }

    /// Run every task to a terminal state. Results come back in plan
    /// order.
    pub async fn run(&self, plan: &Plan) -> Vec<TaskResult> {
        let mut states: HashMap<String, TaskState> = plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskState::Pending))
            .collect();

        for task in &plan.tasks {
            self.trace
                .record_task_spec(&task.id, serde_json::to_value(task).unwrap_or_default())
                .await;
        }

        let mut join_set: JoinSet<TaskResult> = JoinSet::new();
        let mut running = 0usize;

        loop {
            // Mark skips and launch whatever became runnable.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for task in &plan.tasks {
                    if !matches!(states.get(&task.id), Some(TaskState::Pending)) {
                        continue;
                    }
                    if !task
                        .depends_on
                        .iter()
                        .all(|dep| matches!(states.get(dep), Some(TaskState::Done(_))))
                    {
                        continue;
                    }

                    if self.cancel.is_cancelled() {
                        let result =
                            skipped_result(&task.id, "session cancelled before the task started");
                        self.finish_task(&mut states, result).await;
                        progressed = true;
                        continue;
                    }

                    if let Some(reason) = self.skip_reason(task, &states) {
                        let result = skipped_result(&task.id, &reason);
                        self.finish_task(&mut states, result).await;
                        progressed = true;
                        continue;
                    }

                    if running < self.config.max_parallel {
                        states.insert(task.id.clone(), TaskState::Running);
                        running += 1;
                        progressed = true;
                        join_set.spawn(self.clone_for_task().run_one(task.clone()));
                    }
                }
            }

            if states
                .values()
                .all(|state| matches!(state, TaskState::Done(_)))
            {
                break;
            }

            match join_set.join_next().await {
                Some(Ok(result)) => {
                    running -= 1;
                    self.finish_task(&mut states, result).await;
                }
                Some(Err(e)) => {
                    warn!("task join failure: {e}");
                    running = running.saturating_sub(1);
                    // The task id is lost with the panic; fail whatever
                    // is still marked running so the loop can settle.
                    let stuck: Vec<String> = states
                        .iter()
                        .filter(|(_, s)| matches!(s, TaskState::Running))
                        .map(|(id, _)| id.clone())
                        .collect();
                    if running == 0 {
                        for id in stuck {
                            let result = failed_result(&id, "task aborted unexpectedly", 1, 0);
                            self.finish_task(&mut states, result).await;
                        }
                    }
                }
                None => {
                    // Nothing running and nothing runnable: a stuck
                    // pending task would mean a broken graph.
                    let stuck: Vec<String> = states
                        .iter()
                        .filter(|(_, s)| !matches!(s, TaskState::Done(_)))
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in stuck {
                        let result = failed_result(&id, "dependency graph never unblocked", 0, 0);
                        self.finish_task(&mut states, result).await;
                    }
                    break;
                }
            }
        }

        plan.tasks
            .iter()
            .filter_map(|task| match states.remove(&task.id) {
                Some(TaskState::Done(result)) => Some(result),
                _ => None,
            })
            .collect()
    }

    async fn finish_task(&self, states: &mut HashMap<String, TaskState>, result: TaskResult) {
        let _ = self.events.send(AgentEvent::TaskFinished {
            task_id: result.task_id.clone(),
            status: result.status.to_string(),
        });
        self.trace
            .record_task_outcome(
                &result.task_id,
                &result.status.to_string(),
                result.attempts,
                result.elapsed_ms,
            )
            .await;
        if let Some(error) = &result.error {
            self.trace
                .record_error(Some(&result.task_id), "task", error)
                .await;
        }
        states.insert(result.task_id.clone(), TaskState::Done(result));
    }

    /// Whether an ancestor's terminal state forces a skip.
    fn skip_reason(&self, task: &Task, states: &HashMap<String, TaskState>) -> Option<String> {
        for dep in &task.depends_on {
            let Some(TaskState::Done(result)) = states.get(dep) else {
                continue;
            };
            match result.status {
                TaskStatus::Ok => {}
                TaskStatus::Failed | TaskStatus::Skipped => {
                    let usable_partial = result.partial
                        && !result.output_text.is_empty()
                        && task.role.spec().accepts_partial_ancestors;
                    if !usable_partial {
                        return Some(format!("dependency '{dep}' {}", result.status));
                    }
                }
            }
        }
        None
    }

    fn clone_for_task(&self) -> TaskExecution {
        TaskExecution {
            runner: Arc::clone(&self.runner),
            fallback: self.fallback.clone(),
            escalation: Arc::clone(&self.escalation),
            config: self.config.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Per-task execution context moved into the spawned task.
struct TaskExecution {
    runner: Arc<dyn TaskRunner>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    escalation: Arc<dyn EscalationPolicy>,
    config: DispatcherConfig,
    events: mpsc::UnboundedSender<AgentEvent>,
    cancel: CancellationToken,
}

impl TaskExecution {
    async fn run_one(self, task: Task) -> TaskResult {
        let started = Instant::now();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let _ = self.events.send(AgentEvent::TaskStarted {
                task_id: task.id.clone(),
                role: task.role.wire_name().to_string(),
                attempt: attempts,
            });

            let attempt = async {
                match tokio::time::timeout(
                    self.config.task_timeout,
                    self.runner.run_task(&task, attempts),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RuntimeError::TaskTimeout(self.config.task_timeout.as_secs())),
                }
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(RuntimeError::Cancelled),
                result = attempt => result,
            };

            match result {
                Ok(outcome) => {
                    return result_from_outcome(&task.id, outcome, attempts, started.elapsed());
                }
                Err(RuntimeError::Cancelled) => {
                    return failed_result(
                        &task.id,
                        "cancelled",
                        attempts,
                        started.elapsed().as_millis(),
                    );
                }
                Err(e) if e.is_retryable() && attempts <= self.config.max_retries => {
                    info!(task = %task.id, attempt = attempts, error = %e, "retrying task");
                    let _ = self.events.send(AgentEvent::Notice {
                        text: format!("Task {} failed ({e}); retrying.", task.id),
                    });
                    continue;
                }
                Err(e) => {
                    if let Some(fallback) = &self.fallback {
                        if e.is_retryable() && self.escalation.should_escalate(&task, attempts) {
                            let _ = self.events.send(AgentEvent::Notice {
                                text: format!(
                                    "Task {} escalated to the fallback provider after {attempts} \
                                     failed attempt(s).",
                                    task.id
                                ),
                            });
                            match fallback.run_task(&task).await {
                                Ok(outcome) => {
                                    return result_from_outcome(
                                        &task.id,
                                        outcome,
                                        attempts + 1,
                                        started.elapsed(),
                                    );
                                }
                                Err(fe) => {
                                    return failed_result(
                                        &task.id,
                                        &format!("{e}; fallback also failed: {fe}"),
                                        attempts + 1,
                                        started.elapsed().as_millis(),
                                    );
                                }
                            }
                        }
                    }
                    return failed_result(
                        &task.id,
                        &e.to_string(),
                        attempts,
                        started.elapsed().as_millis(),
                    );
                }
            }
        }
    }
}

fn result_from_outcome(
    task_id: &str,
    outcome: TaskOutcome,
    attempts: usize,
    elapsed: Duration,
) -> TaskResult {
    if outcome.loop_limit_hit {
        // Loop-limit exits keep their partial text; dependents that
        // declare partial acceptance may still consume it.
        return TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            output_text: outcome.text,
            tool_calls: outcome.tool_calls,
            elapsed_ms: elapsed.as_millis(),
            attempts,
            partial: true,
            error: Some("loop limit reached".to_string()),
        };
    }

    TaskResult {
        task_id: task_id.to_string(),
        status: TaskStatus::Ok,
        output_text: outcome.text,
        tool_calls: outcome.tool_calls,
        elapsed_ms: elapsed.as_millis(),
        attempts,
        partial: false,
        error: None,
    }
}

fn failed_result(task_id: &str, error: &str, attempts: usize, elapsed_ms: u128) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        status: TaskStatus::Failed,
        output_text: String::new(),
        tool_calls: Vec::new(),
        elapsed_ms,
        attempts,
        partial: false,
        error: Some(error.to_string()),
    }
}

fn skipped_result(task_id: &str, reason: &str) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        status: TaskStatus::Skipped,
        output_text: String::new(),
        tool_calls: Vec::new(),
        elapsed_ms: 0,
        attempts: 0,
        partial: false,
        error: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::roles::AgentRole;
    use std::sync::Mutex;

    fn task(id: &str, role: AgentRole, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            role,
            description: format!("work for {id}"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            expected_output: None,
        }
    }

    fn plan(tasks: Vec<Task>) -> Plan {
        Plan {
            tasks,
            rationale: None,
        }
    }

    fn ok_outcome(text: &str) -> TaskOutcome {
        TaskOutcome {
            text: text.to_string(),
            tool_calls: Vec::new(),
            loop_limit_hit: false,
            eval_tokens: 0,
        }
    }

    /// Records start order; behavior per task id is scripted.
    struct ScriptedRunner {
        starts: Mutex<Vec<String>>,
        fail_transport: Vec<String>,
        fail_once: Mutex<Vec<String>>,
        fail_domain: Vec<String>,
        loop_limit: Vec<String>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                starts: Mutex::new(Vec::new()),
                fail_transport: Vec::new(),
                fail_once: Mutex::new(Vec::new()),
                fail_domain: Vec::new(),
                loop_limit: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run_task(
            &self,
            task: &Task,
            _attempt: usize,
        ) -> Result<TaskOutcome, RuntimeError> {
            self.starts.lock().unwrap().push(task.id.clone());

            {
                let mut fail_once = self.fail_once.lock().unwrap();
                if let Some(at) = fail_once.iter().position(|id| id == &task.id) {
                    fail_once.remove(at);
                    return Err(RuntimeError::ToolTransport("connection dropped".into()));
                }
            }
            if self.fail_transport.contains(&task.id) {
                return Err(RuntimeError::ToolTransport("connection dropped".into()));
            }
            if self.fail_domain.contains(&task.id) {
                return Err(RuntimeError::ToolDomain("bad arguments".into()));
            }
            if self.loop_limit.contains(&task.id) {
                return Ok(TaskOutcome {
                    text: format!("partial work for {}", task.id),
                    tool_calls: Vec::new(),
                    loop_limit_hit: true,
                    eval_tokens: 0,
                });
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ok_outcome(&format!("done {}", task.id)))
        }
    }

    fn dispatcher(runner: Arc<dyn TaskRunner>) -> Dispatcher {
        let (events, _rx) = mpsc::unbounded_channel();
        Dispatcher::new(
            runner,
            DispatcherConfig {
                max_parallel: 2,
                max_retries: 2,
                task_timeout: Duration::from_secs(5),
            },
            Arc::new(TraceSink::disabled()),
            events,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn execution_respects_dependency_order() {
        let runner = Arc::new(ScriptedRunner::new());
        let dispatcher = dispatcher(runner.clone());

        let results = dispatcher
            .run(&plan(vec![
                task("task_1", AgentRole::FileOps, &[]),
                task("task_2", AgentRole::Shell, &["task_1"]),
                task("task_3", AgentRole::Shell, &["task_2"]),
            ]))
            .await;

        assert!(results.iter().all(|r| r.status == TaskStatus::Ok));
        let starts = runner.starts.lock().unwrap().clone();
        assert_eq!(starts, vec!["task_1", "task_2", "task_3"]);
    }

    #[tokio::test]
    async fn siblings_all_complete() {
        let runner = Arc::new(ScriptedRunner::new());
        let dispatcher = dispatcher(runner.clone());

        let results = dispatcher
            .run(&plan(vec![
                task("task_1", AgentRole::Shell, &[]),
                task("task_2", AgentRole::Shell, &[]),
                task("task_3", AgentRole::Shell, &[]),
            ]))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == TaskStatus::Ok));
        // Results come back in plan order regardless of interleaving.
        let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["task_1", "task_2", "task_3"]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let mut runner = ScriptedRunner::new();
        runner.fail_once = Mutex::new(vec!["task_1".to_string()]);
        let dispatcher = dispatcher(Arc::new(runner));

        let results = dispatcher
            .run(&plan(vec![task("task_1", AgentRole::Shell, &[])]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Ok);
        assert_eq!(results[0].attempts, 2);
    }

    #[tokio::test]
    async fn non_recoverable_failure_fails_fast() {
        let mut runner = ScriptedRunner::new();
        runner.fail_domain = vec!["task_1".to_string()];
        let dispatcher = dispatcher(Arc::new(runner));

        let results = dispatcher
            .run(&plan(vec![task("task_1", AgentRole::Shell, &[])]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[0].attempts, 1);
    }

    #[tokio::test]
    async fn dependents_of_failed_tasks_are_skipped() {
        let mut runner = ScriptedRunner::new();
        runner.fail_domain = vec!["task_1".to_string()];
        let dispatcher = dispatcher(Arc::new(runner));

        let results = dispatcher
            .run(&plan(vec![
                task("task_1", AgentRole::Shell, &[]),
                task("task_2", AgentRole::Shell, &["task_1"]),
                task("task_3", AgentRole::Shell, &["task_2"]),
            ]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[1].status, TaskStatus::Skipped);
        assert_eq!(results[2].status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn partial_ancestor_feeds_accepting_role() {
        let mut runner = ScriptedRunner::new();
        runner.loop_limit = vec!["task_1".to_string()];
        let dispatcher = dispatcher(Arc::new(runner));

        let results = dispatcher
            .run(&plan(vec![
                task("task_1", AgentRole::Shell, &[]),
                // Debugger accepts partial ancestors; Shell does not.
                task("task_2", AgentRole::Debugger, &["task_1"]),
                task("task_3", AgentRole::Shell, &["task_1"]),
            ]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Failed);
        assert!(results[0].partial);
        assert_eq!(results[1].status, TaskStatus::Ok);
        assert_eq!(results[2].status, TaskStatus::Skipped);
    }

    struct AlwaysOkFallback;

    #[async_trait]
    impl FallbackProvider for AlwaysOkFallback {
        async fn run_task(&self, task: &Task) -> Result<TaskOutcome, RuntimeError> {
            Ok(ok_outcome(&format!("fallback handled {}", task.id)))
        }
    }

    #[tokio::test]
    async fn exhausted_retries_escalate_to_fallback() {
        let mut runner = ScriptedRunner::new();
        runner.fail_transport = vec!["task_1".to_string()];
        let dispatcher = dispatcher(Arc::new(runner)).with_fallback(
            Arc::new(AlwaysOkFallback),
            Arc::new(ConsecutiveFailurePolicy { threshold: 2 }),
        );

        let results = dispatcher
            .run(&plan(vec![task("task_1", AgentRole::Shell, &[])]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Ok);
        assert!(results[0].output_text.contains("fallback handled"));
        // 3 local attempts (1 + 2 retries) plus the fallback run.
        assert_eq!(results[0].attempts, 4);
    }

    #[tokio::test]
    async fn without_fallback_exhausted_retries_fail() {
        let mut runner = ScriptedRunner::new();
        runner.fail_transport = vec!["task_1".to_string()];
        let dispatcher = dispatcher(Arc::new(runner));

        let results = dispatcher
            .run(&plan(vec![task("task_1", AgentRole::Shell, &[])]))
            .await;

        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[0].attempts, 3);
    }

    #[tokio::test]
    async fn cancellation_prevents_new_tasks() {
        let runner = Arc::new(ScriptedRunner::new());
        let (events, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dispatcher = Dispatcher::new(
            runner.clone(),
            DispatcherConfig::default(),
            Arc::new(TraceSink::disabled()),
            events,
            cancel,
        );

        let results = dispatcher
            .run(&plan(vec![
                task("task_1", AgentRole::Shell, &[]),
                task("task_2", AgentRole::Shell, &["task_1"]),
            ]))
            .await;

        assert!(results.iter().all(|r| r.status == TaskStatus::Skipped));
        assert!(runner.starts.lock().unwrap().is_empty());
    }
}
