//! Path policy and the path-locking tool.
//!
//! Only relative paths under the working directory are accepted by
//! default. Absolute paths are refused unless they resolve inside the
//! working directory, the session set the internal allow-absolute flag,
//! or the path is the user's canonical client config file.
//!
//! `validate_file_path` is the structural guard against model path
//! hallucination: it resolves the given path to an absolute locked path
//! the caller is contractually obliged to reuse verbatim.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::canonical_client_config;
use crate::tools::registry::ToolResult;

use super::{BuiltinState, BuiltinTool};

/// Resolve a raw path under the session's policy. Returns an absolute,
/// lexically-normalized path or a descriptive refusal.
pub fn resolve(state: &BuiltinState, raw: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("empty path".to_string());
    }

    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        state.working_dir.join(candidate)
    };

    let normalized = normalize(&joined)
        .ok_or_else(|| format!("path '{raw}' escapes its root via '..'"))?;

    if normalized.starts_with(&state.working_dir) {
        return Ok(normalized);
    }

    if normalized == canonical_client_config() {
        return Ok(normalized);
    }

    if candidate.is_absolute() && state.allow_absolute.load(Ordering::Relaxed) {
        return Ok(normalized);
    }

    Err(format!(
        "path '{raw}' is outside the working directory ({})",
        state.working_dir.display()
    ))
}

/// Lexical normalization: fold `.` and `..` without touching the
/// filesystem, so paths that do not exist yet still resolve. Returns
/// `None` when `..` would climb past the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => return None,
            },
            other => parts.push(other),
        }
    }
    Some(parts.iter().collect())
}

pub struct ValidateFilePathTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    task_description: String,
}

#[async_trait]
impl BuiltinTool for ValidateFilePathTool {
    fn name(&self) -> &'static str {
        "validate_file_path"
    }

    fn description(&self) -> &'static str {
        "REQUIRED FIRST STEP for file operations: validate the file path taken from your task \
         description. Returns the locked absolute path that you MUST use verbatim in every \
         subsequent file operation. Do not modify, shorten, or substitute the locked path."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The exact file path from your task description, copied character-for-character"
                },
                "task_description": {
                    "type": "string",
                    "description": "Your complete task description, used to verify the extraction"
                }
            },
            "required": ["path", "task_description"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: Params = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let locked = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        // Existence is informational only; a missing file may be about
        // to be created.
        let exists_note = if locked.exists() {
            "File exists"
        } else {
            "File does not exist yet (it will be created if you write to it)"
        };

        let task_echo: String = params.task_description.chars().take(200).collect();
        let ellipsis = if params.task_description.chars().count() > 200 {
            "..."
        } else {
            ""
        };

        ToolResult::success(format!(
            "PATH LOCKED: {}\n\
             Status: {exists_note}\n\
             \n\
             You MUST use this exact path for every subsequent file operation in this task.\n\
             Do not modify, shorten, or change it, and do not try path variations on failure.\n\
             \n\
             Task: {task_echo}{ellipsis}",
            locked.display()
        ))
    }
}
