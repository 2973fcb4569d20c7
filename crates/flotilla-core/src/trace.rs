//! Opt-in structured trace of a delegation run.
//!
//! One JSON document per `process_query` run: planner prompt and
//! response, every task's spec, model calls, tool calls, state
//! transitions, and wall-clock timings. Levels gate how much is kept:
//! `summary` records task specs and outcomes only, `basic` adds call
//! payloads truncated to a byte budget, `full` keeps them whole, and
//! `debug` additionally captures streaming-chunk boundaries.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::constants::TRACE_TRUNCATE_BYTES;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    #[default]
    Off,
    Summary,
    Basic,
    Full,
    Debug,
}

impl std::str::FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TraceLevel::Off),
            "summary" => Ok(TraceLevel::Summary),
            "basic" => Ok(TraceLevel::Basic),
            "full" => Ok(TraceLevel::Full),
            "debug" => Ok(TraceLevel::Debug),
            other => Err(format!("unknown trace level: {other}")),
        }
    }
}

impl std::fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TraceLevel::Off => "off",
            TraceLevel::Summary => "summary",
            TraceLevel::Basic => "basic",
            TraceLevel::Full => "full",
            TraceLevel::Debug => "debug",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default, Serialize)]
struct TraceDocument {
    session: String,
    started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    planner: Option<PlannerTrace>,
    tasks: BTreeMap<String, TaskTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorTrace>,
}

#[derive(Debug, Serialize)]
struct PlannerTrace {
    prompt: String,
    response: String,
}

#[derive(Debug, Default, Serialize)]
struct TaskTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u128>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    model_calls: Vec<ModelCallTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transitions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stream_chunks: Vec<StreamChunkTrace>,
}

#[derive(Debug, Serialize)]
struct ModelCallTrace {
    prompt: String,
    response: String,
}

#[derive(Debug, Serialize)]
struct ToolCallTrace {
    name: String,
    arguments: Value,
    output: String,
    is_error: bool,
}

#[derive(Debug, Serialize)]
struct StreamChunkTrace {
    kind: String,
    bytes: usize,
}

#[derive(Debug, Serialize)]
struct ErrorTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<String>,
    tag: String,
    message: String,
}

pub struct TraceSink {
    level: TraceLevel,
    dir: PathBuf,
    doc: Mutex<TraceDocument>,
}

impl TraceSink {
    pub fn new(level: TraceLevel, dir: PathBuf) -> Self {
        let now = chrono::Local::now();
        Self {
            level,
            dir,
            doc: Mutex::new(TraceDocument {
                session: now.format("%Y%m%d_%H%M%S").to_string(),
                started_at: now.to_rfc3339(),
                ..Default::default()
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(TraceLevel::Off, PathBuf::new())
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    pub fn enabled(&self) -> bool {
        self.level > TraceLevel::Off
    }

    /// Truncate captured payloads at the `basic` level; `full`/`debug`
    /// keep them whole.
    fn clip(&self, text: &str) -> String {
        if self.level >= TraceLevel::Full || text.len() <= TRACE_TRUNCATE_BYTES {
            return text.to_string();
        }
        let mut cut = TRACE_TRUNCATE_BYTES;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}… [{} bytes total]", &text[..cut], text.len())
    }

    pub async fn record_planner(&self, prompt: &str, response: &str) {
        if self.level < TraceLevel::Basic {
            return;
        }
        self.doc.lock().await.planner = Some(PlannerTrace {
            prompt: self.clip(prompt),
            response: self.clip(response),
        });
    }

    pub async fn record_task_spec(&self, task_id: &str, spec: Value) {
        if !self.enabled() {
            return;
        }
        let mut doc = self.doc.lock().await;
        doc.tasks.entry(task_id.to_string()).or_default().spec = Some(spec);
    }

    pub async fn record_task_outcome(
        &self,
        task_id: &str,
        status: &str,
        attempts: usize,
        elapsed_ms: u128,
    ) {
        if !self.enabled() {
            return;
        }
        let mut doc = self.doc.lock().await;
        let task = doc.tasks.entry(task_id.to_string()).or_default();
        task.status = Some(status.to_string());
        task.attempts = attempts;
        task.elapsed_ms = Some(elapsed_ms);
    }

    pub async fn record_model_call(&self, task_id: &str, prompt: &str, response: &str) {
        if self.level < TraceLevel::Basic {
            return;
        }
        let mut doc = self.doc.lock().await;
        doc.tasks
            .entry(task_id.to_string())
            .or_default()
            .model_calls
            .push(ModelCallTrace {
                prompt: self.clip(prompt),
                response: self.clip(response),
            });
    }

    pub async fn record_tool_call(
        &self,
        task_id: &str,
        name: &str,
        arguments: &Value,
        output: &str,
        is_error: bool,
    ) {
        if self.level < TraceLevel::Basic {
            return;
        }
        let mut doc = self.doc.lock().await;
        doc.tasks
            .entry(task_id.to_string())
            .or_default()
            .tool_calls
            .push(ToolCallTrace {
                name: name.to_string(),
                arguments: arguments.clone(),
                output: self.clip(output),
                is_error,
            });
    }

    pub async fn record_transition(&self, task_id: &str, state: &str) {
        if self.level < TraceLevel::Basic {
            return;
        }
        let mut doc = self.doc.lock().await;
        doc.tasks
            .entry(task_id.to_string())
            .or_default()
            .transitions
            .push(state.to_string());
    }

    pub async fn record_stream_chunk(&self, task_id: &str, kind: &str, bytes: usize) {
        if self.level < TraceLevel::Debug {
            return;
        }
        let mut doc = self.doc.lock().await;
        doc.tasks
            .entry(task_id.to_string())
            .or_default()
            .stream_chunks
            .push(StreamChunkTrace {
                kind: kind.to_string(),
                bytes,
            });
    }

    pub async fn record_error(&self, task_id: Option<&str>, tag: &str, message: &str) {
        if !self.enabled() {
            return;
        }
        self.doc.lock().await.errors.push(ErrorTrace {
            task: task_id.map(str::to_string),
            tag: tag.to_string(),
            message: self.clip(message),
        });
    }

    /// Close the document and write it to the trace directory. Returns
    /// the written path, or `None` when tracing is off.
    pub async fn finish(&self, query: &str, reply: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.enabled() {
            return Ok(None);
        }

        let path = {
            let mut doc = self.doc.lock().await;
            doc.finished_at = Some(chrono::Local::now().to_rfc3339());
            doc.query = Some(self.clip(query));
            doc.reply = Some(self.clip(reply));

            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("creating trace dir {}", self.dir.display()))?;

            let path = self.dir.join(format!("trace_{}.json", doc.session));
            let body = serde_json::to_string_pretty(&*doc)?;
            tokio::fs::write(&path, body)
                .await
                .with_context(|| format!("writing trace to {}", path.display()))?;
            path
        };

        tracing::info!(path = %path.display(), "trace written");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn off_level_writes_nothing() {
        let sink = TraceSink::disabled();
        sink.record_task_spec("task_1", json!({})).await;
        assert_eq!(sink.finish("q", "r").await.unwrap(), None);
    }

    #[tokio::test]
    async fn summary_skips_payloads_but_keeps_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TraceSink::new(TraceLevel::Summary, dir.path().to_path_buf());

        sink.record_task_spec("task_1", json!({"id": "task_1"})).await;
        sink.record_model_call("task_1", "prompt", "response").await;
        sink.record_task_outcome("task_1", "ok", 1, 42).await;

        let path = sink.finish("q", "r").await.unwrap().unwrap();
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(doc["tasks"]["task_1"]["status"], "ok");
        assert_eq!(doc["tasks"]["task_1"]["attempts"], 1);
        assert!(doc["tasks"]["task_1"].get("model_calls").is_none());
    }

    #[tokio::test]
    async fn basic_truncates_large_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TraceSink::new(TraceLevel::Basic, dir.path().to_path_buf());

        let huge = "x".repeat(TRACE_TRUNCATE_BYTES * 2);
        sink.record_model_call("task_1", "p", &huge).await;

        let path = sink.finish("q", "r").await.unwrap().unwrap();
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let captured = doc["tasks"]["task_1"]["model_calls"][0]["response"]
            .as_str()
            .unwrap();
        assert!(captured.len() < huge.len());
        assert!(captured.contains("bytes total"));
    }

    #[tokio::test]
    async fn full_keeps_payloads_whole_and_debug_keeps_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TraceSink::new(TraceLevel::Debug, dir.path().to_path_buf());

        let huge = "x".repeat(TRACE_TRUNCATE_BYTES * 2);
        sink.record_model_call("task_1", "p", &huge).await;
        sink.record_stream_chunk("task_1", "text", 11).await;
        sink.record_tool_call("task_1", "builtin.read_file", &json!({"path": "a"}), "ok", false)
            .await;

        let path = sink.finish("q", "r").await.unwrap().unwrap();
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(
            doc["tasks"]["task_1"]["model_calls"][0]["response"]
                .as_str()
                .unwrap()
                .len(),
            huge.len()
        );
        assert_eq!(doc["tasks"]["task_1"]["stream_chunks"][0]["bytes"], 11);
        assert_eq!(
            doc["tasks"]["task_1"]["tool_calls"][0]["name"],
            "builtin.read_file"
        );
    }

    #[test]
    fn level_parsing() {
        assert_eq!("basic".parse::<TraceLevel>().unwrap(), TraceLevel::Basic);
        assert_eq!("DEBUG".parse::<TraceLevel>().unwrap(), TraceLevel::Debug);
        assert!("verbose".parse::<TraceLevel>().is_err());
        assert!(TraceLevel::Full > TraceLevel::Basic);
    }
}
