//! File I/O built-ins.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::ToolResult;

use super::paths::resolve;
use super::{BuiltinState, BuiltinTool};

const DEFAULT_READ_LIMIT: usize = 2000;

// ── read_file ──────────────────────────────────────────────────────────

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl BuiltinTool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file's contents with line numbers. Supports partial reading of large files via \
         a 1-indexed line offset and an optional line count."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to read"},
                "offset": {"type": "number", "description": "1-indexed line to start reading from"},
                "limit": {"type": "number", "description": "Number of lines to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: ReadParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if !path.exists() {
            return ToolResult::error(format!("File not found: {}", params.path));
        }
        if !path.is_file() {
            return ToolResult::error(format!("Path is not a file: {}", params.path));
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read {}: {e}", params.path)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let offset = params.offset.unwrap_or(1).max(1);
        if offset > total && total > 0 {
            return ToolResult::error(format!(
                "offset {offset} is beyond the end of '{}' ({total} lines)",
                params.path
            ));
        }

        let limit = params.limit.unwrap_or(DEFAULT_READ_LIMIT);
        let start = offset - 1;
        let end = (start + limit).min(total);

        let mut numbered = String::new();
        for (index, line) in lines[start..end].iter().enumerate() {
            numbered.push_str(&format!("{}: {line}\n", start + index + 1));
        }

        let mut output = format!(
            "File: {} (lines {}-{} of {total})\n{numbered}",
            params.path,
            offset.min(total.max(1)),
            end
        );
        if end < total {
            output.push_str(&format!("[{} more lines not shown]\n", total - end));
        }

        ToolResult::success(output)
    }
}

// ── write_file ─────────────────────────────────────────────────────────

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[async_trait]
impl BuiltinTool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file with the given content. Parent directories are created as needed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to write"},
                "content": {"type": "string", "description": "The complete file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: WriteParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let _guard = state.lock_path(&path).await;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("failed to create parent directory: {e}"));
            }
        }

        match fs::write(&path, &params.content).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} lines ({} bytes) to {}",
                params.content.lines().count(),
                params.content.len(),
                params.path
            )),
            Err(e) => ToolResult::error(format!("failed to write {}: {e}", params.path)),
        }
    }
}

// ── patch_file ─────────────────────────────────────────────────────────

pub struct PatchFileTool;

#[derive(Deserialize)]
struct PatchParams {
    path: String,
    patch: String,
}

#[derive(Debug, Default)]
struct Hunk {
    old: Vec<String>,
    new: Vec<String>,
}

#[async_trait]
impl BuiltinTool for PatchFileTool {
    fn name(&self) -> &'static str {
        "patch_file"
    }

    fn description(&self) -> &'static str {
        "Apply a patch to one file. The patch is a sequence of hunks separated by lines starting \
         with '@@'; within a hunk, lines starting with a space are context, '-' removes a line, \
         '+' adds a line. Context and removed lines must match the file exactly."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to patch"},
                "patch": {"type": "string", "description": "Hunks of ' ', '-' and '+' prefixed lines, separated by '@@' lines"}
            },
            "required": ["path", "patch"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PatchParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", params.path));
        }

        let hunks = parse_hunks(&params.patch);
        if hunks.is_empty() {
            return ToolResult::error("patch contains no hunks");
        }

        let _guard = state.lock_path(&path).await;

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read {}: {e}", params.path)),
        };
        let had_trailing_newline = content.ends_with('\n');
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        let mut cursor = 0;
        for (index, hunk) in hunks.iter().enumerate() {
            match find_subsequence(&lines, &hunk.old, cursor) {
                Some(at) => {
                    lines.splice(at..at + hunk.old.len(), hunk.new.iter().cloned());
                    cursor = at + hunk.new.len();
                }
                None => {
                    return ToolResult::error(format!(
                        "hunk {} does not match '{}' (searched from line {})",
                        index + 1,
                        params.path,
                        cursor + 1
                    ));
                }
            }
        }

        let mut updated = lines.join("\n");
        if had_trailing_newline {
            updated.push('\n');
        }

        match fs::write(&path, &updated).await {
            Ok(()) => ToolResult::success(format!(
                "Applied {} hunk(s) to {}",
                hunks.len(),
                params.path
            )),
            Err(e) => ToolResult::error(format!("failed to write {}: {e}", params.path)),
        }
    }
}

fn parse_hunks(patch: &str) -> Vec<Hunk> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current = Hunk::default();
    let mut current_used = false;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if current_used {
                hunks.push(std::mem::take(&mut current));
                current_used = false;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('+') {
            current.new.push(rest.to_string());
            current_used = true;
        } else if let Some(rest) = line.strip_prefix('-') {
            current.old.push(rest.to_string());
            current_used = true;
        } else {
            let context = line.strip_prefix(' ').unwrap_or(line);
            if line.is_empty() && !current_used {
                continue;
            }
            current.old.push(context.to_string());
            current.new.push(context.to_string());
            current_used = true;
        }
    }

    if current_used {
        hunks.push(current);
    }
    hunks
}

fn find_subsequence(haystack: &[String], needle: &[String], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&at| haystack[at..at + needle.len()] == *needle)
}

// ── create_directory / delete_file ─────────────────────────────────────

pub struct CreateDirectoryTool;

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[async_trait]
impl BuiltinTool for CreateDirectoryTool {
    fn name(&self) -> &'static str {
        "create_directory"
    }

    fn description(&self) -> &'static str {
        "Create a directory (and any missing parents)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path to create"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PathParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match fs::create_dir_all(&path).await {
            Ok(()) => ToolResult::success(format!("Created directory {}", params.path)),
            Err(e) => ToolResult::error(format!("failed to create {}: {e}", params.path)),
        }
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl BuiltinTool for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a single file. Directories are refused."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to delete"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PathParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if !path.exists() {
            return ToolResult::error(format!("File not found: {}", params.path));
        }
        if path.is_dir() {
            return ToolResult::error(format!(
                "'{}' is a directory; delete_file only removes files",
                params.path
            ));
        }

        let _guard = state.lock_path(&path).await;
        match fs::remove_file(&path).await {
            Ok(()) => ToolResult::success(format!("Deleted {}", params.path)),
            Err(e) => ToolResult::error(format!("failed to delete {}: {e}", params.path)),
        }
    }
}

// ── listings ───────────────────────────────────────────────────────────

pub struct ListFilesTool;

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    recursive: Option<bool>,
}

#[async_trait]
impl BuiltinTool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files in a directory, optionally filtered by a glob pattern and recursing into \
         subdirectories. Defaults to the working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: working directory)"},
                "pattern": {"type": "string", "description": "Glob pattern, e.g. *.pdf"},
                "recursive": {"type": "boolean", "description": "Recurse into subdirectories"}
            }
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: ListParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let root = match resolve(state, params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if !root.is_dir() {
            return ToolResult::error(format!(
                "Directory not found: {}",
                params.path.as_deref().unwrap_or(".")
            ));
        }

        let pattern = match params.pattern.as_deref().map(glob::Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => return ToolResult::error(format!("bad pattern: {e}")),
            None => None,
        };

        let mut files = Vec::new();
        if params.recursive.unwrap_or(false) {
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                if matches_pattern(&pattern, &relative) {
                    files.push(relative);
                }
            }
        } else {
            let mut entries = match fs::read_dir(&root).await {
                Ok(rd) => rd,
                Err(e) => return ToolResult::error(format!("failed to list: {e}")),
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|ft| ft.is_file())
                    .unwrap_or(false);
                if !is_file {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if matches_pattern(&pattern, &name) {
                    files.push(name);
                }
            }
        }

        files.sort();
        ToolResult::success(format!(
            "{} file(s) in {}:\n{}",
            files.len(),
            root.display(),
            files.join("\n")
        ))
    }
}

fn matches_pattern(pattern: &Option<glob::Pattern>, candidate: &str) -> bool {
    let Some(pattern) = pattern else { return true };
    if pattern.as_str().contains('/') {
        pattern.matches(candidate)
    } else {
        // Bare patterns match the file name, wherever it sits.
        let name = candidate.rsplit('/').next().unwrap_or(candidate);
        pattern.matches(name)
    }
}

pub struct ListDirectoriesTool;

#[derive(Deserialize)]
struct ListDirsParams {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl BuiltinTool for ListDirectoriesTool {
    fn name(&self) -> &'static str {
        "list_directories"
    }

    fn description(&self) -> &'static str {
        "List the subdirectories of a directory. Defaults to the working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: working directory)"}
            }
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: ListDirsParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let root = match resolve(state, params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if !root.is_dir() {
            return ToolResult::error(format!(
                "Directory not found: {}",
                params.path.as_deref().unwrap_or(".")
            ));
        }

        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&root).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("failed to list: {e}")),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        dirs.sort();
        ToolResult::success(format!(
            "{} directorie(s) in {}:\n{}",
            dirs.len(),
            root.display(),
            dirs.join("\n")
        ))
    }
}

// ── file_exists / get_file_info ────────────────────────────────────────

pub struct FileExistsTool;

#[async_trait]
impl BuiltinTool for FileExistsTool {
    fn name(&self) -> &'static str {
        "file_exists"
    }

    fn description(&self) -> &'static str {
        "Check whether a path exists, and whether it is a file or a directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to check"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PathParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let verdict = if path.is_file() {
            "exists (file)"
        } else if path.is_dir() {
            "exists (directory)"
        } else {
            "does not exist"
        };
        ToolResult::success(format!("{}: {verdict}", params.path))
    }
}

pub struct GetFileInfoTool;

#[async_trait]
impl BuiltinTool for GetFileInfoTool {
    fn name(&self) -> &'static str {
        "get_file_info"
    }

    fn description(&self) -> &'static str {
        "Report a file's size, kind, and modification time."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to inspect"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: PathParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };
        let path = match resolve(state, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return ToolResult::error(format!("File not found: {}", params.path)),
        };

        let kind = if metadata.is_dir() { "directory" } else { "file" };
        let modified = metadata
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());

        ToolResult::success(format!(
            "{}: {kind}, {} bytes, modified {modified}",
            params.path,
            metadata.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::test_support::builtins_in;

    #[tokio::test]
    async fn read_file_partial_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::write(
            dir.path().join("data.txt"),
            "alpha\nbeta\ngamma\ndelta\nepsilon\n",
        )
        .unwrap();

        let result = builtins
            .execute(
                "read_file",
                json!({"path": "data.txt", "offset": 2, "limit": 2}),
            )
            .await;
        assert!(!result.is_error, "{}", result.output);
        assert!(result.output.contains("2: beta"));
        assert!(result.output.contains("3: gamma"));
        assert!(!result.output.contains("1: alpha"));
        assert!(!result.output.contains("4: delta"));
        assert!(result.output.contains("[2 more lines not shown]"));
    }

    #[tokio::test]
    async fn read_file_offset_past_end_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::write(dir.path().join("short.txt"), "one\ntwo\n").unwrap();

        let result = builtins
            .execute("read_file", json!({"path": "short.txt", "offset": 50}))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("short.txt"));
        assert!(result.output.contains("2 lines"));
    }

    #[tokio::test]
    async fn read_file_distinguishes_missing_from_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let missing = builtins
            .execute("read_file", json!({"path": "nope.txt"}))
            .await;
        assert!(missing.output.contains("File not found"));

        let not_file = builtins
            .execute("read_file", json!({"path": "subdir"}))
            .await;
        assert!(not_file.output.contains("not a file"));
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        let write = builtins
            .execute(
                "write_file",
                json!({"path": "notes/new.md", "content": "# Title\nbody\n"}),
            )
            .await;
        assert!(!write.is_error, "{}", write.output);

        let read = builtins
            .execute("read_file", json!({"path": "notes/new.md"}))
            .await;
        assert!(read.output.contains("1: # Title"));
        assert!(read.output.contains("2: body"));
    }

    #[tokio::test]
    async fn patch_file_applies_matching_hunk() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::write(dir.path().join("code.py"), "a = 1\nb = 2\nc = 3\n").unwrap();

        let patch = " a = 1\n-b = 2\n+b = 20\n c = 3";
        let result = builtins
            .execute("patch_file", json!({"path": "code.py", "patch": patch}))
            .await;
        assert!(!result.is_error, "{}", result.output);

        let updated = std::fs::read_to_string(dir.path().join("code.py")).unwrap();
        assert_eq!(updated, "a = 1\nb = 20\nc = 3\n");
    }

    #[tokio::test]
    async fn patch_file_rejects_mismatched_hunk() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::write(dir.path().join("code.py"), "a = 1\n").unwrap();

        let result = builtins
            .execute(
                "patch_file",
                json!({"path": "code.py", "patch": "-x = 9\n+x = 10"}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("hunk 1"));
    }

    #[tokio::test]
    async fn delete_file_refuses_directories() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::create_dir(dir.path().join("keep")).unwrap();

        let result = builtins
            .execute("delete_file", json!({"path": "keep"}))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("directory"));
        assert!(dir.path().join("keep").exists());
    }

    #[tokio::test]
    async fn list_files_pattern_and_recursion() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::write(dir.path().join("a.pdf"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.pdf"), "").unwrap();

        let flat = builtins
            .execute("list_files", json!({"pattern": "*.pdf"}))
            .await;
        assert!(flat.output.contains("a.pdf"));
        assert!(!flat.output.contains("c.pdf"));
        assert!(!flat.output.contains("b.txt"));

        let deep = builtins
            .execute("list_files", json!({"pattern": "*.pdf", "recursive": true}))
            .await;
        assert!(deep.output.contains("a.pdf"));
        assert!(deep.output.contains("sub/c.pdf"));
    }

    #[tokio::test]
    async fn list_directories_and_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        std::fs::create_dir(dir.path().join("reports")).unwrap();
        std::fs::write(dir.path().join("x.txt"), "").unwrap();

        let dirs = builtins.execute("list_directories", json!({})).await;
        assert!(dirs.output.contains("reports"));
        assert!(!dirs.output.contains("x.txt"));

        let exists = builtins
            .execute("file_exists", json!({"path": "x.txt"}))
            .await;
        assert!(exists.output.contains("exists (file)"));

        let missing = builtins
            .execute("file_exists", json!({"path": "ghost.txt"}))
            .await;
        assert!(missing.output.contains("does not exist"));
        assert!(!missing.is_error);
    }
}
