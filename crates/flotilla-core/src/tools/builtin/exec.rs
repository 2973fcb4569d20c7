//! Command-execution built-ins: bash, Python, and the pytest runner.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::registry::ToolResult;

use super::{BuiltinState, BuiltinTool};

const COMMAND_TIMEOUT_SECS: u64 = 60;
const MAX_CAPTURED_BYTES: usize = 50_000;

static ANSI_ESCAPES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("valid regex"));

fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPES.replace_all(text, "").into_owned()
}

/// Keep the head of the output within the capture budget, cutting on a
/// char boundary and noting how much was dropped.
fn clamp_output(text: &str) -> String {
    if text.len() <= MAX_CAPTURED_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_CAPTURED_BYTES;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[... output truncated: {} of {} bytes shown ...]",
        &text[..cut],
        cut,
        text.len()
    )
}

/// Run a prepared command to completion under the shared deadline and
/// format its streams for the model.
async fn run_command(mut command: Command, label: &str) -> ToolResult {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("NO_COLOR", "1")
        .kill_on_drop(true);

    let output = match tokio::time::timeout(
        Duration::from_secs(COMMAND_TIMEOUT_SECS),
        command.output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return ToolResult::error(format!("{label} failed to start: {e}")),
        Err(_) => {
            return ToolResult::error(format!(
                "{label} timed out after {COMMAND_TIMEOUT_SECS}s"
            ))
        }
    };

    let stdout = clamp_output(&strip_ansi(&String::from_utf8_lossy(&output.stdout)));
    let stderr = clamp_output(&strip_ansi(&String::from_utf8_lossy(&output.stderr)));

    let mut text = String::new();
    if !stdout.trim().is_empty() {
        text.push_str(stdout.trim_end());
        text.push('\n');
    }
    if !stderr.trim().is_empty() {
        text.push_str("stderr:\n");
        text.push_str(stderr.trim_end());
        text.push('\n');
    }

    let code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        if text.is_empty() {
            text.push_str("(no output)\n");
        }
        ToolResult::success(format!("{text}exit code: {code}"))
    } else {
        ToolResult {
            output: format!("{text}exit code: {code}"),
            is_error: true,
        }
    }
}

// ── execute_bash_command ───────────────────────────────────────────────

pub struct ExecuteBashCommandTool;

#[derive(Deserialize)]
struct BashParams {
    command: String,
}

#[async_trait]
impl BuiltinTool for ExecuteBashCommandTool {
    fn name(&self) -> &'static str {
        "execute_bash_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the working directory and return its output and exit code. \
         Use for system operations, moving or copying files, and directory management."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to run"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: BashParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        if params.command.trim().is_empty() {
            return ToolResult::error("empty command");
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&params.command)
            .current_dir(&state.working_dir);
        run_command(command, "command").await
    }
}

// ── execute_python_code ────────────────────────────────────────────────

pub struct ExecutePythonCodeTool;

#[derive(Deserialize)]
struct PythonParams {
    code: String,
}

#[async_trait]
impl BuiltinTool for ExecutePythonCodeTool {
    fn name(&self) -> &'static str {
        "execute_python_code"
    }

    fn description(&self) -> &'static str {
        "Execute a Python snippet and return its output. Use for data filtering, sorting, date \
         arithmetic, and iterating over results from other tools."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "The Python code to execute"}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PythonParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        if params.code.trim().is_empty() {
            return ToolResult::error("empty code");
        }

        let Some(python) = find_python() else {
            return ToolResult::error("no python interpreter found on PATH");
        };

        // The snippet goes through a temp file so quoting in the code
        // cannot break out of the invocation.
        let script = std::env::temp_dir().join(format!("flotilla_{}.py", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&script, &params.code).await {
            return ToolResult::error(format!("failed to stage code: {e}"));
        }

        let mut command = Command::new(python);
        command.arg(&script).current_dir(&state.working_dir);
        let result = run_command(command, "python").await;

        let _ = tokio::fs::remove_file(&script).await;
        result
    }
}

fn find_python() -> Option<std::path::PathBuf> {
    which::which("python3").or_else(|_| which::which("python")).ok()
}

// ── run_pytest ─────────────────────────────────────────────────────────

pub struct RunPytestTool;

#[derive(Deserialize)]
struct PytestParams {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    markers: Option<String>,
    #[serde(default)]
    verbose: Option<bool>,
}

#[async_trait]
impl BuiltinTool for RunPytestTool {
    fn name(&self) -> &'static str {
        "run_pytest"
    }

    fn description(&self) -> &'static str {
        "Run pytest and report the results directly. Preferred over execute_bash_command for \
         tests: output comes back without any file I/O."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Test file or directory (default: the whole suite)"},
                "markers": {"type": "string", "description": "Marker expression, e.g. \"not slow\""},
                "verbose": {"type": "boolean", "description": "Pass -v for per-test output"}
            }
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PytestParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let Some(python) = find_python() else {
            return ToolResult::error("no python interpreter found on PATH");
        };

        let mut command = Command::new(python);
        command.arg("-m").arg("pytest").current_dir(&state.working_dir);

        if let Some(path) = params.path.as_deref().filter(|p| !p.trim().is_empty()) {
            // Paths with spaces arrive quoted from some models.
            match shell_words::split(path) {
                Ok(parts) => {
                    command.args(parts);
                }
                Err(_) => {
                    command.arg(path);
                }
            }
        }
        if let Some(markers) = params.markers.as_deref().filter(|m| !m.trim().is_empty()) {
            command.arg("-m").arg(markers);
        }
        if params.verbose.unwrap_or(false) {
            command.arg("-v");
        }

        let result = run_command(command, "pytest").await;
        let verdict = if result.is_error { "FAILED" } else { "PASSED" };
        ToolResult {
            output: format!("pytest result: {verdict}\n{}", result.output),
            is_error: result.is_error,
        }
    }
}
