//! Feature-tracking built-ins.
//!
//! Goals own features; features carry a status; progress entries and
//! test records accumulate as an audit trail. From the runtime's
//! perspective these are ordinary tools; nothing schedules or updates
//! memory implicitly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::registry::ToolResult;

use super::{BuiltinState, BuiltinTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::str::FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(FeatureStatus::Pending),
            "in_progress" => Ok(FeatureStatus::InProgress),
            "completed" => Ok(FeatureStatus::Completed),
            "failed" => Ok(FeatureStatus::Failed),
            other => Err(format!(
                "unknown status '{other}' (expected pending, in_progress, completed, or failed)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub title: String,
    pub status: FeatureStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEntry {
    pub at: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    pub at: String,
    pub path: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    pub goals: Vec<Goal>,
    pub progress: Vec<ProgressEntry>,
    pub tests: Vec<TestRecord>,
}

impl MemoryState {
    fn find_feature_mut(&mut self, feature_id: &str) -> Option<&mut Feature> {
        self.goals
            .iter_mut()
            .flat_map(|g| g.features.iter_mut())
            .find(|f| f.id == feature_id)
    }

    fn find_feature(&self, feature_id: &str) -> Option<(&Goal, &Feature)> {
        self.goals.iter().find_map(|g| {
            g.features
                .iter()
                .find(|f| f.id == feature_id)
                .map(|f| (g, f))
        })
    }
}

fn timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}

// ── read operations ────────────────────────────────────────────────────

pub struct GetMemoryStateTool;

#[async_trait]
impl BuiltinTool for GetMemoryStateTool {
    fn name(&self) -> &'static str {
        "get_memory_state"
    }

    fn description(&self) -> &'static str {
        "Show all tracked goals and features with their statuses, plus recent progress entries."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, state: &BuiltinState) -> ToolResult {
        let memory = state.memory.lock().await;
        if memory.goals.is_empty() && memory.progress.is_empty() {
            return ToolResult::success("Memory is empty: no goals or features are tracked.");
        }

        let mut out = String::new();
        for goal in &memory.goals {
            out.push_str(&format!("Goal {} - {}\n", goal.id, goal.title));
            for feature in &goal.features {
                out.push_str(&format!(
                    "  {} [{}] {}\n",
                    feature.id,
                    serde_json::to_value(feature.status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    feature.title
                ));
            }
        }

        if !memory.progress.is_empty() {
            out.push_str("Recent progress:\n");
            for entry in memory.progress.iter().rev().take(5) {
                out.push_str(&format!("  {} {}\n", entry.at, entry.message));
            }
        }

        ToolResult::success(out)
    }
}

pub struct GetFeatureDetailsTool;

#[derive(Deserialize)]
struct FeatureIdParams {
    feature_id: String,
}

#[async_trait]
impl BuiltinTool for GetFeatureDetailsTool {
    fn name(&self) -> &'static str {
        "get_feature_details"
    }

    fn description(&self) -> &'static str {
        "Show one tracked feature: its goal, title, and current status."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "feature_id": {"type": "string", "description": "Feature id, e.g. F1.3"}
            },
            "required": ["feature_id"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: FeatureIdParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let memory = state.memory.lock().await;
        match memory.find_feature(&params.feature_id) {
            Some((goal, feature)) => ToolResult::success(format!(
                "Feature {} - {} (goal {} - {}), status: {:?}",
                feature.id, feature.title, goal.id, goal.title, feature.status
            )),
            None => ToolResult::error(format!("no feature with id '{}'", params.feature_id)),
        }
    }
}

pub struct GetGoalDetailsTool;

#[derive(Deserialize)]
struct GoalIdParams {
    goal_id: String,
}

#[async_trait]
impl BuiltinTool for GetGoalDetailsTool {
    fn name(&self) -> &'static str {
        "get_goal_details"
    }

    fn description(&self) -> &'static str {
        "Show one tracked goal and all of its features."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal_id": {"type": "string", "description": "Goal id, e.g. G1"}
            },
            "required": ["goal_id"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: GoalIdParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let memory = state.memory.lock().await;
        match memory.goals.iter().find(|g| g.id == params.goal_id) {
            Some(goal) => {
                let mut out = format!("Goal {} - {}\n", goal.id, goal.title);
                for feature in &goal.features {
                    out.push_str(&format!(
                        "  {} [{:?}] {}\n",
                        feature.id, feature.status, feature.title
                    ));
                }
                ToolResult::success(out)
            }
            None => ToolResult::error(format!("no goal with id '{}'", params.goal_id)),
        }
    }
}

// ── write operations ───────────────────────────────────────────────────

pub struct UpdateFeatureStatusTool;

#[derive(Deserialize)]
struct UpdateStatusParams {
    feature_id: String,
    status: String,
}

#[async_trait]
impl BuiltinTool for UpdateFeatureStatusTool {
    fn name(&self) -> &'static str {
        "update_feature_status"
    }

    fn description(&self) -> &'static str {
        "Set a feature's status (pending, in_progress, completed, failed). Never mark a feature \
         completed when its tests just failed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "feature_id": {"type": "string", "description": "Feature id, e.g. F1.3"},
                "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "failed"]}
            },
            "required": ["feature_id", "status"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: UpdateStatusParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let status: FeatureStatus = match params.status.parse() {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e),
        };

        let mut memory = state.memory.lock().await;
        match memory.find_feature_mut(&params.feature_id) {
            Some(feature) => {
                feature.status = status;
                ToolResult::success(format!(
                    "Feature {} is now {}",
                    params.feature_id, params.status
                ))
            }
            None => ToolResult::error(format!("no feature with id '{}'", params.feature_id)),
        }
    }
}

pub struct LogProgressTool;

#[derive(Deserialize)]
struct LogProgressParams {
    message: String,
    #[serde(default)]
    details: Option<String>,
}

#[async_trait]
impl BuiltinTool for LogProgressTool {
    fn name(&self) -> &'static str {
        "log_progress"
    }

    fn description(&self) -> &'static str {
        "Record a progress milestone: what was done, the result, and next steps."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "One-line summary of the milestone"},
                "details": {"type": "string", "description": "Optional longer notes"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: LogProgressParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let mut memory = state.memory.lock().await;
        memory.progress.push(ProgressEntry {
            at: timestamp(),
            message: params.message,
            details: params.details,
        });
        ToolResult::success(format!(
            "Progress logged ({} entries).",
            memory.progress.len()
        ))
    }
}

pub struct AddTestResultTool;

#[derive(Deserialize)]
struct AddTestResultParams {
    path: String,
    result: String,
    #[serde(default)]
    details: Option<String>,
}

#[async_trait]
impl BuiltinTool for AddTestResultTool {
    fn name(&self) -> &'static str {
        "add_test_result"
    }

    fn description(&self) -> &'static str {
        "Record a test run: the tested path, pass/fail, and any details."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Test path that was run"},
                "result": {"type": "string", "description": "pass or fail"},
                "details": {"type": "string", "description": "Failure details, if any"}
            },
            "required": ["path", "result"]
        })
    }

    async fn execute(&self, args: Value, state: &BuiltinState) -> ToolResult {
        let params: AddTestResultParams = match serde_json::from_value(args) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        let mut memory = state.memory.lock().await;
        memory.tests.push(TestRecord {
            at: timestamp(),
            path: params.path,
            result: params.result,
            details: params.details,
        });
        ToolResult::success(format!(
            "Test result recorded ({} total).",
            memory.tests.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::test_support::builtins_in;

    async fn seed(builtins: &crate::tools::Builtins) {
        let mut memory = builtins.state().memory.lock().await;
        memory.goals.push(Goal {
            id: "G1".into(),
            title: "Ship the importer".into(),
            features: vec![
                Feature {
                    id: "F1.1".into(),
                    title: "CSV parsing".into(),
                    status: FeatureStatus::InProgress,
                },
                Feature {
                    id: "F1.2".into(),
                    title: "Validation".into(),
                    status: FeatureStatus::Pending,
                },
            ],
        });
    }

    #[tokio::test]
    async fn empty_memory_reports_itself() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        let result = builtins.execute("get_memory_state", json!({})).await;
        assert!(result.output.contains("Memory is empty"));
    }

    #[tokio::test]
    async fn feature_lookup_and_status_update() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        seed(&builtins).await;

        let details = builtins
            .execute("get_feature_details", json!({"feature_id": "F1.1"}))
            .await;
        assert!(details.output.contains("CSV parsing"));
        assert!(details.output.contains("G1"));

        let update = builtins
            .execute(
                "update_feature_status",
                json!({"feature_id": "F1.1", "status": "completed"}),
            )
            .await;
        assert!(!update.is_error);

        let memory = builtins.state().memory.lock().await;
        let (_, feature) = memory.find_feature("F1.1").unwrap();
        assert_eq!(feature.status, FeatureStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_ids_and_statuses_are_descriptive_errors() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        seed(&builtins).await;

        let missing = builtins
            .execute("get_feature_details", json!({"feature_id": "F9.9"}))
            .await;
        assert!(missing.is_error);
        assert!(missing.output.contains("F9.9"));

        let bad_status = builtins
            .execute(
                "update_feature_status",
                json!({"feature_id": "F1.1", "status": "done"}),
            )
            .await;
        assert!(bad_status.is_error);
        assert!(bad_status.output.contains("done"));
    }

    #[tokio::test]
    async fn progress_and_test_records_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;

        builtins
            .execute("log_progress", json!({"message": "parsed 10 files"}))
            .await;
        builtins
            .execute(
                "add_test_result",
                json!({"path": "tests/unit", "result": "pass"}),
            )
            .await;

        let memory = builtins.state().memory.lock().await;
        assert_eq!(memory.progress.len(), 1);
        assert_eq!(memory.tests.len(), 1);
        assert_eq!(memory.tests[0].result, "pass");
    }

    #[tokio::test]
    async fn goal_details_lists_features() {
        let dir = tempfile::tempdir().unwrap();
        let builtins = builtins_in(dir.path()).await;
        seed(&builtins).await;

        let result = builtins
            .execute("get_goal_details", json!({"goal_id": "G1"}))
            .await;
        assert!(result.output.contains("F1.1"));
        assert!(result.output.contains("F1.2"));
    }
}
