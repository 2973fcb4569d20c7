//! Event protocol between the runtime and its consumers.
//!
//! The session and everything below it emit `AgentEvent`s on an
//! unbounded channel; the CLI (or any other frontend) maps them to its
//! own presentation. Nothing in the core prints.

use serde::Serialize;

use crate::model::ChatMetrics;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Answer text delta from the model stream.
    AnswerDelta { text: String },

    /// Reasoning text delta from the model stream.
    ThinkingDelta { text: String },

    /// The planner produced a validated plan.
    PlanReady { task_count: usize, rationale: Option<String> },

    /// A task began executing (attempt is 1-based).
    TaskStarted { task_id: String, role: String, attempt: usize },

    /// A task reached a terminal state.
    TaskFinished { task_id: String, status: String },

    /// A tool call is about to run.
    ToolExecuting { label: String, name: String },

    /// A tool call finished.
    ToolResult {
        label: String,
        name: String,
        is_error: bool,
    },

    /// Human-facing notice (loop limit reached, retry, escalation).
    Notice { text: String },

    /// Terminal metrics from one model call.
    Metrics { metrics: ChatMetrics },
}
