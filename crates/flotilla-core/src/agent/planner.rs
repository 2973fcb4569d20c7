//! The planner: a distinguished agent whose output is a typed task
//! graph, plus the validation and lints applied to it.
//!
//! Tasks are immutable after emission and must be fully self-contained:
//! every literal a task needs (paths, filenames, ids) is embedded in its
//! own description. `depends_on` orders execution; it never carries
//! data. The lints below reject plans that violate this.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::roles::{AgentRole, AgentSpec};
use crate::error::RuntimeError;

/// One unit of work emitted by the planner.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub role: AgentRole,
    pub description: String,
    pub depends_on: Vec<String>,
    pub expected_output: Option<String>,
}

/// A validated task graph.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    agent_type: String,
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    expected_output: Option<String>,
}

/// The planner's own agent spec. Not part of the assignable role set.
pub static PLANNER: AgentSpec = AgentSpec {
    display_name: "Planner",
    system_prompt: PLANNER_PROMPT,
    allowed_tools: Some(&[]),
    allow_server_tools: false,
    loop_limit: 1,
    temperature: 0.2,
    accepts_partial_ancestors: false,
};

const PLANNER_PROMPT: &str = r#"You are a task planner. Decompose the user's request into tasks for specialist agents and return ONLY a fenced JSON object:

```json
{"tasks": [{"id": "task_1", "agent_type": "FILE_OPS", "description": "...", "depends_on": [], "expected_output": "..."}], "rationale": "..."}
```

Agent types (use exactly these names):
- FILE_OPS: read files (full or partial), list directories, validate paths, check existence. Never writes.
- TEST_RUNNER: run pytest and report results. Never fixes anything.
- CONFIG: query and update configuration, system prompt, server list.
- MEMORY: feature tracking - update statuses, log progress, record test results.
- SHELL: bash commands, Python code, and all remote tools. The general executor for commands, data filtering, and batch operations.
- CODE_WRITER: the ONLY type that may create or modify source files.
- CODE_READER: read-only code analysis.
- DEBUGGER: reproduce and localize faults, propose a fix.
- RESEARCHER: gather information via remote tools.
- AGGREGATOR: never assign this; the runtime invokes it.

Rules:

1. STAY ON TASK. Plan only what the user asked for. Seeing memory context (goals, features) does NOT mean updating it: create MEMORY tasks only when the user explicitly asks to update memory, log progress, or mark a feature. A question about a file gets exactly one file task, nothing more.

2. SELF-CONTAINED DESCRIPTIONS. Each task executes in isolation and cannot see other tasks' outputs. Never write "the previous task", "from task_2", or "using the results". If a task needs a value, embed the literal value in its description.

3. PATHS. If the user names a file path, copy it verbatim into every task that touches that file. Convert relative paths against the working directory yourself; never emit a task to "determine the path".

4. BATCH OPERATIONS.
   - The user enumerated the items ("delete a.pdf, b.pdf, c.pdf"): one task per item, each naming exactly one item.
   - The items are discovered at runtime ("list this month's reports and delete each"): a SINGLE SHELL task whose description says to query first and then iterate in one Python script. You cannot plan per-item tasks for items you have not seen.

5. DEPENDENCIES. depends_on lists ids of earlier tasks only, and expresses ordering, not data flow. Keep the graph minimal.

6. RIGHT-SIZE. One task per coherent operation. Do not split a single read into validate/read/report tasks; the specialist handles its own protocol."#;

/// Patterns that indicate a task description references another task's
/// output instead of embedding the data.
static FORBIDDEN_REFERENCES: &[&str] = &[
    "from task_",
    "the previous task",
    "previous task's",
    "from the previous",
    "using the results",
    "results of task_",
    "output of task_",
    "gathered earlier",
    "found in task",
    "listed in task",
];

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*json\s*\n(.*?)```").expect("valid regex"));

/// Path-like tokens in a user query: anything with a directory
/// separator, or a bare filename with an extension.
static PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[\w.-]+/)+[\w.-]+|\b[\w-]+\.[A-Za-z]{1,4}\b").expect("valid regex")
});

/// Parse and validate the planner's response against the user query.
pub fn parse_plan(response: &str, user_query: &str) -> Result<Plan, RuntimeError> {
    let raw = extract_plan_json(response)?;

    if raw.tasks.is_empty() {
        return Err(RuntimeError::PlanInvalid("plan contains no tasks".into()));
    }

    let mut tasks = Vec::with_capacity(raw.tasks.len());
    let mut seen_ids: Vec<String> = Vec::new();

    for raw_task in raw.tasks {
        if raw_task.id.trim().is_empty() {
            return Err(RuntimeError::PlanInvalid("task with empty id".into()));
        }
        if seen_ids.contains(&raw_task.id) {
            return Err(RuntimeError::PlanInvalid(format!(
                "duplicate task id '{}'",
                raw_task.id
            )));
        }

        let Some(role) = AgentRole::from_wire(&raw_task.agent_type) else {
            return Err(RuntimeError::UnknownAgent(raw_task.agent_type));
        };

        for dep in &raw_task.depends_on {
            if dep == &raw_task.id {
                return Err(RuntimeError::PlanInvalid(format!(
                    "task '{}' depends on itself",
                    raw_task.id
                )));
            }
            if !seen_ids.contains(dep) {
                return Err(RuntimeError::PlanInvalid(format!(
                    "task '{}' depends on '{dep}', which is not declared before it",
                    raw_task.id
                )));
            }
        }

        seen_ids.push(raw_task.id.clone());
        tasks.push(Task {
            id: raw_task.id,
            role,
            description: raw_task.description,
            depends_on: raw_task.depends_on,
            expected_output: raw_task.expected_output,
        });
    }

    lint_references(&tasks)?;
    lint_path_propagation(&tasks, user_query)?;

    Ok(Plan {
        tasks,
        rationale: raw.rationale,
    })
}

fn extract_plan_json(response: &str) -> Result<RawPlan, RuntimeError> {
    let mut last_error = None;

    for capture in JSON_FENCE.captures_iter(response) {
        let block = capture.get(1).expect("group 1").as_str();
        match serde_json::from_str::<RawPlan>(block) {
            Ok(raw) => return Ok(raw),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    match serde_json::from_str::<RawPlan>(response.trim()) {
        Ok(raw) => Ok(raw),
        Err(e) => Err(RuntimeError::PlanInvalid(format!(
            "planner response is not a JSON plan: {}",
            last_error.unwrap_or_else(|| e.to_string())
        ))),
    }
}

/// Reject descriptions that reference other tasks' outputs. Each agent
/// execution is stateless; a reference the agent cannot resolve makes it
/// hallucinate placeholder data.
fn lint_references(tasks: &[Task]) -> Result<(), RuntimeError> {
    for task in tasks {
        let lowered = task.description.to_lowercase();
        for pattern in FORBIDDEN_REFERENCES {
            if lowered.contains(pattern) {
                return Err(RuntimeError::PlanInvalid(format!(
                    "task '{}' references another task's output (\"{pattern}\"); descriptions \
                     must embed the data they need",
                    task.id
                )));
            }
        }
    }
    Ok(())
}

/// Every task that operates on a file named in the user query must carry
/// the full path verbatim, not just the file name.
fn lint_path_propagation(tasks: &[Task], user_query: &str) -> Result<(), RuntimeError> {
    for token in PATH_TOKEN.find_iter(user_query) {
        let path = token.as_str();
        if !path.contains('/') {
            continue;
        }
        let Some(file_name) = path.rsplit('/').next().filter(|n| n.contains('.')) else {
            continue;
        };

        for task in tasks {
            if task.description.contains(file_name) && !task.description.contains(path) {
                return Err(RuntimeError::PlanInvalid(format!(
                    "task '{}' mentions '{file_name}' without the full path '{path}' from the \
                     user query",
                    task.id
                )));
            }
        }
    }
    Ok(())
}

/// The planner's user message: the query plus ambient context.
pub fn build_planner_message(user_query: &str, working_dir: &std::path::Path) -> String {
    format!(
        "Working directory: {}\n\nUser request:\n{user_query}",
        working_dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_json(tasks: &str) -> String {
        format!("Here is the plan.\n```json\n{{\"tasks\": {tasks}}}\n```")
    }

    #[test]
    fn valid_plan_parses() {
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "FILE_OPS", "description": "Read lines 50-100 of src/main.py", "depends_on": [], "expected_output": "numbered lines"},
                {"id": "task_2", "agent_type": "SHELL", "description": "Count the functions defined in src/main.py using Python", "depends_on": ["task_1"]}
            ]"#,
        );

        let plan = parse_plan(&response, "Read lines 50-100 of src/main.py").unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].role, AgentRole::FileOps);
        assert_eq!(plan.tasks[1].depends_on, vec!["task_1"]);
    }

    #[test]
    fn bare_json_without_fence_is_accepted() {
        let response = r#"{"tasks": [{"id": "task_1", "agent_type": "SHELL", "description": "echo hi", "depends_on": []}]}"#;
        assert!(parse_plan(response, "say hi").is_ok());
    }

    #[test]
    fn empty_and_malformed_plans_are_invalid() {
        assert!(matches!(
            parse_plan("no json here", "q"),
            Err(RuntimeError::PlanInvalid(_))
        ));
        assert!(matches!(
            parse_plan(&plan_json("[]"), "q"),
            Err(RuntimeError::PlanInvalid(_))
        ));
    }

    #[test]
    fn unknown_agent_type_is_rejected() {
        let response = plan_json(
            r#"[{"id": "task_1", "agent_type": "EXECUTOR", "description": "do things", "depends_on": []}]"#,
        );
        match parse_plan(&response, "q") {
            Err(RuntimeError::UnknownAgent(name)) => assert_eq!(name, "EXECUTOR"),
            other => panic!("expected UnknownAgent, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "SHELL", "description": "a", "depends_on": []},
                {"id": "task_1", "agent_type": "SHELL", "description": "b", "depends_on": []}
            ]"#,
        );
        assert!(matches!(
            parse_plan(&response, "q"),
            Err(RuntimeError::PlanInvalid(_))
        ));
    }

    #[test]
    fn forward_and_self_references_are_rejected() {
        let forward = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "SHELL", "description": "a", "depends_on": ["task_2"]},
                {"id": "task_2", "agent_type": "SHELL", "description": "b", "depends_on": []}
            ]"#,
        );
        assert!(parse_plan(&forward, "q").is_err());

        let cycle = plan_json(
            r#"[{"id": "task_1", "agent_type": "SHELL", "description": "a", "depends_on": ["task_1"]}]"#,
        );
        assert!(parse_plan(&cycle, "q").is_err());
    }

    #[test]
    fn cross_task_reference_lint_fires() {
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "FILE_OPS", "description": "List the PDF files in reports/", "depends_on": []},
                {"id": "task_2", "agent_type": "SHELL", "description": "Delete each file found in task_1", "depends_on": ["task_1"]}
            ]"#,
        );
        let err = parse_plan(&response, "q").unwrap_err();
        assert!(matches!(err, RuntimeError::PlanInvalid(msg) if msg.contains("task_2")));
    }

    #[test]
    fn path_propagation_lint_fires() {
        // task_2 names the file but drops the directory prefix
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "FILE_OPS", "description": "Validate and read src/main.py", "depends_on": []},
                {"id": "task_2", "agent_type": "CODE_READER", "description": "Summarize the functions in main.py", "depends_on": ["task_1"]}
            ]"#,
        );
        let err = parse_plan(&response, "Summarize src/main.py").unwrap_err();
        assert!(matches!(err, RuntimeError::PlanInvalid(msg) if msg.contains("src/main.py")));
    }

    #[test]
    fn path_propagation_accepts_full_paths() {
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "FILE_OPS", "description": "Read lines 50-100 of src/main.py", "depends_on": []}
            ]"#,
        );
        assert!(parse_plan(&response, "Read lines 50-100 of src/main.py").is_ok());
    }

    #[test]
    fn tasks_not_touching_the_file_are_not_linted() {
        let response = plan_json(
            r#"[
                {"id": "task_1", "agent_type": "SHELL", "description": "Print the current date with Python", "depends_on": []}
            ]"#,
        );
        assert!(parse_plan(&response, "What changed in src/main.py today?").is_ok());
    }
}
