//! The tool plane seen by agents: the merged registry plus the built-in
//! tool set.

pub mod builtin;
pub mod registry;

pub use builtin::{BuiltinState, Builtins};
pub use registry::{
    ExecutionMode, LookupOutcome, ToolDescriptor, ToolOrigin, ToolRegistry, ToolResult,
};
