//! The closed specialist set.
//!
//! Each role is an agent spec: a fixed system prompt, a tool whitelist,
//! a loop bound, and a temperature. The planner assigns tasks to these
//! roles by their wire names; anything outside the set is rejected at
//! plan validation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    FileOps,
    TestRunner,
    Config,
    Memory,
    Shell,
    CodeWriter,
    CodeReader,
    Debugger,
    Researcher,
    Aggregator,
}

impl AgentRole {
    pub const ALL: &'static [AgentRole] = &[
        AgentRole::FileOps,
        AgentRole::TestRunner,
        AgentRole::Config,
        AgentRole::Memory,
        AgentRole::Shell,
        AgentRole::CodeWriter,
        AgentRole::CodeReader,
        AgentRole::Debugger,
        AgentRole::Researcher,
        AgentRole::Aggregator,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentRole::FileOps => "FILE_OPS",
            AgentRole::TestRunner => "TEST_RUNNER",
            AgentRole::Config => "CONFIG",
            AgentRole::Memory => "MEMORY",
            AgentRole::Shell => "SHELL",
            AgentRole::CodeWriter => "CODE_WRITER",
            AgentRole::CodeReader => "CODE_READER",
            AgentRole::Debugger => "DEBUGGER",
            AgentRole::Researcher => "RESEARCHER",
            AgentRole::Aggregator => "AGGREGATOR",
        }
    }

    pub fn from_wire(name: &str) -> Option<AgentRole> {
        AgentRole::ALL
            .iter()
            .copied()
            .find(|role| role.wire_name() == name.trim())
    }

    pub fn spec(&self) -> &'static AgentSpec {
        match self {
            AgentRole::FileOps => &FILE_OPS,
            AgentRole::TestRunner => &TEST_RUNNER,
            AgentRole::Config => &CONFIG,
            AgentRole::Memory => &MEMORY,
            AgentRole::Shell => &SHELL,
            AgentRole::CodeWriter => &CODE_WRITER,
            AgentRole::CodeReader => &CODE_READER,
            AgentRole::Debugger => &DEBUGGER,
            AgentRole::Researcher => &RESEARCHER,
            AgentRole::Aggregator => &AGGREGATOR,
        }
    }
}

/// Everything the executor needs to run one role.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub display_name: &'static str,
    pub system_prompt: &'static str,
    /// Built-in whitelist; `None` exposes every built-in.
    pub allowed_tools: Option<&'static [&'static str]>,
    /// Whether remote server tools are visible to this role.
    pub allow_server_tools: bool,
    pub loop_limit: usize,
    pub temperature: f32,
    /// Whether this role will run on top of a failed ancestor's partial
    /// output instead of being skipped.
    pub accepts_partial_ancestors: bool,
}

static FILE_OPS: AgentSpec = AgentSpec {
    display_name: "File Operations Specialist",
    system_prompt: "You are a file operations specialist handling file reading, listing, and \
path validation.\n\n\
PATH LOCKING PROTOCOL (mandatory for every file operation):\n\
1. Call builtin.validate_file_path FIRST with the exact path from your task description.\n\
2. Use ONLY the returned locked path in all subsequent calls, verbatim.\n\
3. If an operation fails, report the error with the locked path. Never try path variations \
and never invent placeholder paths.\n\n\
You can read files (fully or partially with offset/limit), list files and directories, check \
existence, and inspect file metadata. You cannot write, delete, or modify anything; say so \
and stop if a task asks for it.",
    allowed_tools: Some(&[
        "builtin.read_file",
        "builtin.validate_file_path",
        "builtin.list_files",
        "builtin.list_directories",
        "builtin.file_exists",
        "builtin.get_file_info",
    ]),
    allow_server_tools: true,
    loop_limit: 10,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static TEST_RUNNER: AgentSpec = AgentSpec {
    display_name: "Test Execution Specialist",
    system_prompt: "You are a test execution specialist. Run tests and report results clearly.\n\n\
Always use builtin.run_pytest rather than shelling out to pytest manually. State PASSED or \
FAILED explicitly, include which tests failed and why, and record the outcome with \
builtin.add_test_result.\n\n\
If tests fail, report and stop. You never modify test code or source code; fixes belong to \
the code writer.",
    allowed_tools: Some(&[
        "builtin.run_pytest",
        "builtin.add_test_result",
        "builtin.execute_bash_command",
    ]),
    allow_server_tools: false,
    loop_limit: 8,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static CONFIG: AgentSpec = AgentSpec {
    display_name: "Configuration Manager",
    system_prompt: "You are a configuration management specialist.\n\n\
Workflow for changes: read the current section with builtin.get_config, modify what is \
needed, then write the COMPLETE section back with builtin.update_config_section. Partial \
section updates are rejected, so always send every field. Verify by reading the section \
again.\n\n\
You also manage the system prompt (get/set) and can list the configured tool servers.",
    allowed_tools: Some(&[
        "builtin.get_config",
        "builtin.update_config_section",
        "builtin.get_system_prompt",
        "builtin.set_system_prompt",
        "builtin.list_mcp_servers",
    ]),
    allow_server_tools: false,
    loop_limit: 8,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static MEMORY: AgentSpec = AgentSpec {
    display_name: "Memory & Feature Tracker",
    system_prompt: "You are a memory and feature tracking specialist managing goals, features, \
and progress.\n\n\
Before marking any feature completed, verify the evidence: if tests just failed, the status \
is failed or in_progress, never completed. If a task is conditional (\"if tests pass, mark \
F1.3 complete\"), check the condition first.\n\n\
When a task tells you to call a tool, actually call it; describing the call is not \
performing it.",
    allowed_tools: Some(&[
        "builtin.get_memory_state",
        "builtin.get_feature_details",
        "builtin.get_goal_details",
        "builtin.update_feature_status",
        "builtin.log_progress",
        "builtin.add_test_result",
    ]),
    allow_server_tools: false,
    loop_limit: 10,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static SHELL: AgentSpec = AgentSpec {
    display_name: "Shell & Script Executor",
    system_prompt: "You are a shell and script execution specialist: bash commands, Python \
code, and every available remote tool.\n\n\
Use bash for system operations and moving files; use Python for data filtering, sorting, \
date arithmetic, and for iterating over results discovered at runtime (query first, then \
loop in one script). Never filter or iterate by hand when code can do it.\n\n\
Do not edit source code and do not delete files through bash; those belong to other roles. \
Complete the task with your tools instead of deferring work back to the user, and if you \
are truly stuck, name the specific blocker.",
    allowed_tools: Some(&[
        "builtin.execute_bash_command",
        "builtin.execute_python_code",
        "builtin.list_files",
        "builtin.file_exists",
    ]),
    allow_server_tools: true,
    loop_limit: 15,
    temperature: 0.4,
    accepts_partial_ancestors: false,
};

static CODE_WRITER: AgentSpec = AgentSpec {
    display_name: "Code Writer",
    system_prompt: "You are the only role allowed to create and modify source files.\n\n\
Call builtin.validate_file_path before touching a file and use the locked path verbatim. \
Read before you edit; prefer builtin.patch_file for targeted changes and builtin.write_file \
for new files. Keep changes minimal and consistent with the surrounding code.\n\n\
If write tools are not available (plan mode), explain that modifications are disabled and \
describe the change instead of attempting it.",
    allowed_tools: Some(&[
        "builtin.validate_file_path",
        "builtin.read_file",
        "builtin.write_file",
        "builtin.patch_file",
        "builtin.create_directory",
        "builtin.delete_file",
        "builtin.list_files",
        "builtin.file_exists",
    ]),
    allow_server_tools: false,
    loop_limit: 12,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static CODE_READER: AgentSpec = AgentSpec {
    display_name: "Code Reader",
    system_prompt: "You are a read-only code analysis specialist. Read and navigate code to \
answer questions about structure and behavior. Quote the relevant lines with their line \
numbers. You never modify anything.",
    allowed_tools: Some(&[
        "builtin.validate_file_path",
        "builtin.read_file",
        "builtin.list_files",
        "builtin.list_directories",
        "builtin.file_exists",
        "builtin.get_file_info",
    ]),
    allow_server_tools: false,
    loop_limit: 10,
    temperature: 0.3,
    accepts_partial_ancestors: false,
};

static DEBUGGER: AgentSpec = AgentSpec {
    display_name: "Debugger",
    system_prompt: "You are a debugging specialist. Reproduce the problem, read the relevant \
code and logs, and narrow the cause with targeted commands and tests. Report the root cause \
and the minimal fix; hand the fix itself to the code writer.",
    allowed_tools: Some(&[
        "builtin.read_file",
        "builtin.list_files",
        "builtin.execute_bash_command",
        "builtin.execute_python_code",
        "builtin.run_pytest",
    ]),
    allow_server_tools: false,
    loop_limit: 12,
    temperature: 0.3,
    accepts_partial_ancestors: true,
};

static RESEARCHER: AgentSpec = AgentSpec {
    display_name: "Researcher",
    system_prompt: "You are a research specialist. Gather information with the available \
remote tools and summarize what you find, citing which tool produced each fact. Separate \
what you verified from what you infer.",
    allowed_tools: Some(&["builtin.read_file", "builtin.list_files"]),
    allow_server_tools: true,
    loop_limit: 10,
    temperature: 0.4,
    accepts_partial_ancestors: true,
};

static AGGREGATOR: AgentSpec = AgentSpec {
    display_name: "Aggregator",
    system_prompt: "You synthesize task results into one reply to the user.\n\n\
Use ONLY facts present in the task results; never invent information that is not there. \
State plainly what succeeded and what failed or was skipped, including partial results. \
Answer the user's original question directly and keep the reply concise.",
    allowed_tools: Some(&[]),
    allow_server_tools: false,
    loop_limit: 1,
    temperature: 0.2,
    accepts_partial_ancestors: true,
};

/// Direct chat mode runs a general assistant over the whole tool plane.
pub static DIRECT_CHAT: AgentSpec = AgentSpec {
    display_name: "Assistant",
    system_prompt: "You are a capable assistant with access to tools. Use them when they \
help, and answer directly when they do not. When working with files, validate paths with \
builtin.validate_file_path first and reuse the locked path verbatim.",
    allowed_tools: None,
    allow_server_tools: true,
    loop_limit: 5,
    temperature: 0.7,
    accepts_partial_ancestors: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRole::from_wire(role.wire_name()), Some(*role));
        }
        assert_eq!(AgentRole::from_wire("PLANNER"), None);
        assert_eq!(AgentRole::from_wire("EXECUTOR"), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&AgentRole::FileOps).unwrap();
        assert_eq!(json, r#""FILE_OPS""#);
        let back: AgentRole = serde_json::from_str(r#""CODE_WRITER""#).unwrap();
        assert_eq!(back, AgentRole::CodeWriter);
    }

    #[test]
    fn writer_is_the_only_role_with_write_tools() {
        for role in AgentRole::ALL {
            let spec = role.spec();
            let has_write = spec
                .allowed_tools
                .unwrap_or(&[])
                .iter()
                .any(|t| matches!(*t, "builtin.write_file" | "builtin.patch_file" | "builtin.delete_file"));
            assert_eq!(
                has_write,
                *role == AgentRole::CodeWriter,
                "unexpected write access for {role:?}"
            );
        }
    }

    #[test]
    fn loop_limits_sit_in_the_specialist_range() {
        for role in AgentRole::ALL {
            let limit = role.spec().loop_limit;
            if *role == AgentRole::Aggregator {
                assert!(limit <= 1);
            } else {
                assert!((8..=15).contains(&limit), "{role:?} limit {limit}");
            }
        }
    }
}
