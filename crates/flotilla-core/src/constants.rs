//! Shared constants.

use std::path::PathBuf;

/// MCP protocol version sent on every HTTP-class transport request.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Default model when neither config nor CLI specify one.
pub const DEFAULT_MODEL: &str = "qwen2.5:32b";

/// Default streaming chat endpoint host.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Default loop limit for direct chat mode. Specialist agents carry their
/// own limits in the 8–15 range.
pub const DEFAULT_LOOP_LIMIT: usize = 5;

/// Upper bound on concurrently running tasks per session.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Retries for a task that failed with a recoverable error.
pub const MAX_TASK_RETRIES: usize = 2;

/// Wall-clock budget per task.
pub const TASK_TIMEOUT_SECS: u64 = 600;

/// Deadline for a single tool call.
pub const TOOL_CALL_TIMEOUT_SECS: u64 = 120;

/// Abort a model stream after this long without a chunk.
pub const STREAM_TIMEOUT_SECS: u64 = 120;

/// Deadline for one request/response round-trip on a tool server session.
pub const SERVER_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tool output handed back to the model is capped at this many chars.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// `basic` trace level truncates captured strings to this many bytes.
pub const TRACE_TRUNCATE_BYTES: usize = 2_048;

/// Name of the per-session config file inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Config directory for flotilla state (`~/.config/flotilla`).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flotilla")
}

/// The user's canonical desktop-assistant config file, used by server
/// auto-discovery and exempted from the relative-path-only policy.
pub fn canonical_client_config() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Application Support/Claude/claude_desktop_config.json")
    }
    #[cfg(target_os = "windows")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("AppData/Roaming/Claude/claude_desktop_config.json")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config/Claude/claude_desktop_config.json")
    }
}
