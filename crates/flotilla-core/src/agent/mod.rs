//! The agent system: role specs, the execution loop, and the
//! planner → dispatcher → aggregator pipeline.

pub mod aggregator;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod planner;
pub mod roles;

pub use dispatcher::{
    ConsecutiveFailurePolicy, Dispatcher, DispatcherConfig, EscalationPolicy, FallbackProvider,
    TaskOutcome, TaskResult, TaskRunner, TaskStatus,
};
pub use events::AgentEvent;
pub use executor::{AgentExecutor, AgentOutcome, ExecutorServices, ToolCallRecord};
pub use planner::{parse_plan, Plan, Task};
pub use roles::{AgentRole, AgentSpec};
