//! Flotilla core library
//!
//! The runtime behind the `flotilla` binary: a multi-agent orchestration
//! pipeline (planner → dispatcher → aggregator) over a streaming local
//! model endpoint, with a uniform tool plane spanning in-process built-in
//! tools and remote MCP-style tool servers reached over stdio, SSE, or
//! streamable HTTP.
//!
//! The UI layers (CLI, web) are thin consumers: they build a [`session::Session`],
//! call [`session::Session::process_query`], and render the
//! [`agent::AgentEvent`] stream.

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod mcp;
pub mod model;
pub mod parser;
pub mod session;
pub mod tools;
pub mod trace;

pub use error::RuntimeError;
pub use session::Session;
