//! Error taxonomy for the orchestration runtime.
//!
//! Two layers. `ToolCallError` is the transport plane's contract: only
//! `Transport` is retryable, `Domain` carries the server's structured
//! error payload back to the model. `RuntimeError` is what tasks and
//! sessions fail with; the dispatcher's retry policy and the CLI's exit
//! codes branch on its kind.

use serde_json::Value;

/// Failure of a single tool-server call.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    /// Connection loss, process death, or a missed deadline. Retryable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server replied with something we could not decode. Not retryable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server executed the tool and reported a domain failure. The
    /// payload goes back to the model verbatim; never retried.
    #[error("tool error: {0}")]
    Domain(Value),

    /// The call was cancelled from our side.
    #[error("call cancelled")]
    Cancelled,
}

/// Task- and session-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The planner's output failed validation. Surfaced to the user verbatim.
    #[error("invalid plan: {0}")]
    PlanInvalid(String),

    /// A task named an agent type outside the closed specialist set.
    #[error("unknown agent type: {0}")]
    UnknownAgent(String),

    /// A tool server became unreachable mid-task.
    #[error("tool transport failure: {0}")]
    ToolTransport(String),

    /// A tool server reported a domain failure that could not be routed
    /// back into the loop (e.g. during planning).
    #[error("tool failure: {0}")]
    ToolDomain(String),

    /// The task exceeded its wall-clock budget.
    #[error("task timed out after {0}s")]
    TaskTimeout(u64),

    /// The model stream stalled or the endpoint did not answer in time.
    #[error("model call timed out")]
    ModelTimeout,

    /// The model endpoint rejected the request or the stream broke.
    #[error("model endpoint error: {0}")]
    Model(String),

    /// The agent hit its loop bound. Partial output is retained.
    #[error("loop limit of {0} reached")]
    LoopLimit(usize),

    /// The session was cancelled. Terminal; never retried.
    #[error("cancelled")]
    Cancelled,

    /// A server descriptor was unusable. Fatal at session open time.
    #[error("transport configuration error: {0}")]
    TransportConfig(String),
}

impl RuntimeError {
    /// Whether the dispatcher may re-run the task after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::ToolTransport(_)
                | RuntimeError::TaskTimeout(_)
                | RuntimeError::ModelTimeout
                | RuntimeError::Model(_)
        )
    }

    /// Stable tag used in traces and for CLI exit-status mapping.
    pub fn tag(&self) -> &'static str {
        match self {
            RuntimeError::PlanInvalid(_) => "plan_invalid",
            RuntimeError::UnknownAgent(_) => "unknown_agent",
            RuntimeError::ToolTransport(_) => "tool_transport",
            RuntimeError::ToolDomain(_) => "tool_domain",
            RuntimeError::TaskTimeout(_) => "task_timeout",
            RuntimeError::ModelTimeout => "model_timeout",
            RuntimeError::Model(_) => "model_error",
            RuntimeError::LoopLimit(_) => "loop_limit",
            RuntimeError::Cancelled => "cancelled",
            RuntimeError::TransportConfig(_) => "transport_config",
        }
    }

    /// Process exit status for the non-interactive CLI path.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::PlanInvalid(_) | RuntimeError::UnknownAgent(_) => 2,
            RuntimeError::Model(_) | RuntimeError::ModelTimeout => 3,
            RuntimeError::ToolTransport(_)
            | RuntimeError::ToolDomain(_)
            | RuntimeError::TransportConfig(_) => 4,
            RuntimeError::TaskTimeout(_) | RuntimeError::LoopLimit(_) => 5,
            RuntimeError::Cancelled => 130,
        }
    }
}

impl From<ToolCallError> for RuntimeError {
    fn from(err: ToolCallError) -> Self {
        match err {
            ToolCallError::Transport(msg) => RuntimeError::ToolTransport(msg),
            ToolCallError::Protocol(msg) => RuntimeError::ToolTransport(format!(
                "malformed response from tool server: {msg}"
            )),
            ToolCallError::Domain(payload) => RuntimeError::ToolDomain(payload.to_string()),
            ToolCallError::Cancelled => RuntimeError::Cancelled,
        }
    }
}
