//! The bounded tool-using loop for one agent invocation.
//!
//! BuildPrompt → StreamModel → ParseToolCalls → ExecuteTools → (loop) →
//! Finalize. Structured tool calls from the stream win; otherwise the
//! accumulated answer text goes through the text parser, and a parse hit
//! displaces the answer for that iteration. Tool calls run strictly in
//! order and their results feed back as tool-role messages. Unknown and
//! disabled tools produce structured error messages, never faults; a
//! transport failure aborts the invocation so the dispatcher can retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{MAX_TOOL_OUTPUT_CHARS, TOOL_CALL_TIMEOUT_SECS};
use crate::error::{RuntimeError, ToolCallError};
use crate::mcp::{protocol::format_payload, ServerManager};
use crate::model::{
    read_stream, ChatMessage, ChatOptions, ChatRequest, ModelClient, ToolCall, ToolDef,
};
use crate::parser::ToolCallParser;
use crate::tools::{Builtins, ExecutionMode, LookupOutcome, ToolOrigin, ToolRegistry, ToolResult};
use crate::trace::TraceSink;

use super::events::AgentEvent;
use super::roles::AgentSpec;

/// Shared services an invocation runs against.
#[derive(Clone)]
pub struct ExecutorServices {
    pub model: Arc<ModelClient>,
    pub registry: Arc<ToolRegistry>,
    pub builtins: Arc<Builtins>,
    pub servers: Arc<ServerManager>,
    pub trace: Arc<TraceSink>,
    pub events: mpsc::UnboundedSender<AgentEvent>,
}

/// One executed tool call, as recorded in task results and traces.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub output: String,
    pub is_error: bool,
    pub elapsed_ms: u128,
}

/// Final state of one invocation.
#[derive(Debug)]
pub struct AgentOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub loop_limit_hit: bool,
    pub eval_tokens: u64,
}

/// Runs one agent invocation end-to-end.
pub struct AgentExecutor {
    services: ExecutorServices,
    parser: ToolCallParser,
    spec: AgentSpec,
    mode: ExecutionMode,
    model_name: String,
    think: bool,
    cancel: CancellationToken,
    /// Task id for delegated runs, or a fixed label ("planner", "chat").
    label: String,
}

impl AgentExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: ExecutorServices,
        spec: &AgentSpec,
        mode: ExecutionMode,
        model_name: impl Into<String>,
        think: bool,
        cancel: CancellationToken,
        label: impl Into<String>,
    ) -> Self {
        Self {
            services,
            parser: ToolCallParser::new(),
            spec: spec.clone(),
            mode,
            model_name: model_name.into(),
            think,
            cancel,
            label: label.into(),
        }
    }

    /// Run with a fresh history: system prompt plus one user message.
    /// Delegated tasks pass the task description verbatim.
    pub async fn run(&self, user_message: &str) -> Result<AgentOutcome, RuntimeError> {
        let messages = vec![
            ChatMessage::system(self.spec.system_prompt),
            ChatMessage::user(user_message),
        ];
        self.run_conversation(messages).await
    }

    /// Run over an existing conversation (direct chat mode). The caller
    /// provides the system message.
    pub async fn run_conversation(
        &self,
        mut messages: Vec<ChatMessage>,
    ) -> Result<AgentOutcome, RuntimeError> {
        let tool_view = self.tool_view().await;
        let wire_tools: Option<Vec<Value>> = if tool_view.is_empty() {
            None
        } else {
            Some(tool_view.iter().map(ToolDef::to_wire).collect())
        };

        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut eval_tokens = 0u64;
        let mut loop_limit_hit = false;

        self.check_cancelled()?;
        self.transition("build_prompt").await;

        let (mut text, mut calls) =
            self.stream_once(&messages, &wire_tools, &mut eval_tokens).await?;
        let mut final_text = text.clone();

        let mut loop_count = 0usize;
        loop {
            push_assistant(&mut messages, &text, &calls);
            if !text.is_empty() {
                final_text = text.clone();
            }

            if calls.is_empty() {
                break;
            }

            if loop_count >= self.spec.loop_limit {
                loop_limit_hit = true;
                let _ = self.services.events.send(AgentEvent::Notice {
                    text: format!(
                        "Loop limit of {} reached for {}; skipping {} pending tool call(s).",
                        self.spec.loop_limit,
                        self.spec.display_name,
                        calls.len()
                    ),
                });
                warn!(label = %self.label, limit = self.spec.loop_limit, "loop limit reached");
                break;
            }
            loop_count += 1;

            self.transition("execute_tools").await;
            for call in &calls {
                self.check_cancelled()?;
                let record = self.execute_tool(call).await?;
                messages.push(ChatMessage::tool(&record.name, record.output.clone()));
                records.push(record);
            }

            self.check_cancelled()?;
            (text, calls) = self
                .stream_once(&messages, &wire_tools, &mut eval_tokens)
                .await?;
        }

        self.transition("finalize").await;
        Ok(AgentOutcome {
            text: final_text,
            tool_calls: records,
            loop_limit_hit,
            eval_tokens,
        })
    }

    /// One model round: stream, then fall back to text parsing when no
    /// structured tool calls arrived.
    async fn stream_once(
        &self,
        messages: &[ChatMessage],
        wire_tools: &Option<Vec<Value>>,
        eval_tokens: &mut u64,
    ) -> Result<(String, Vec<ToolCall>), RuntimeError> {
        self.check_cancelled()?;
        self.transition("stream_model").await;

        let request = ChatRequest {
            model: self.model_name.clone(),
            messages: messages.to_vec(),
            tools: wire_tools.clone(),
            options: ChatOptions {
                temperature: Some(self.spec.temperature),
                ..Default::default()
            },
            think: self.think.then_some(true),
            stream: true,
        };

        let rx = self.services.model.chat_stream(&request).await?;
        let outcome = read_stream(rx, &self.services.events, &self.cancel).await?;

        if let Some(metrics) = &outcome.metrics {
            *eval_tokens += metrics.eval_count;
            let _ = self.services.events.send(AgentEvent::Metrics {
                metrics: metrics.clone(),
            });
        }

        let prompt_tail = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.services
            .trace
            .record_model_call(&self.label, &prompt_tail, &outcome.text)
            .await;
        self.services
            .trace
            .record_stream_chunk(&self.label, "answer", outcome.text.len())
            .await;

        let mut text = outcome.text;
        let mut calls = outcome.tool_calls;

        if calls.is_empty() && !text.is_empty() {
            self.transition("parse_tool_calls").await;
            let parsed = self.parser.parse(&text);
            if !parsed.is_empty() {
                debug!(label = %self.label, count = parsed.len(), "parsed tool calls from text");
                calls = parsed;
                // A parse hit displaces the answer text for this round.
                text = String::new();
            }
        }

        Ok((text, calls))
    }

    /// Execute one call. Only transport-class failures (and cancellation)
    /// abort the invocation; everything else becomes a tool message.
    async fn execute_tool(&self, call: &ToolCall) -> Result<ToolCallRecord, RuntimeError> {
        let _ = self.services.events.send(AgentEvent::ToolExecuting {
            label: self.label.clone(),
            name: call.name.clone(),
        });

        let started = Instant::now();
        let deadline = Duration::from_secs(TOOL_CALL_TIMEOUT_SECS);

        let result = match self.services.registry.lookup(&call.name).await {
            LookupOutcome::NotFound => ToolResult::error(format!(
                "Unknown tool: {}. Check the list of available tools and adjust the call.",
                call.name
            )),
            LookupOutcome::Disabled => ToolResult::error(format!(
                "Tool '{}' is currently disabled and cannot be used.",
                call.name
            )),
            LookupOutcome::Found(descriptor) => match &descriptor.origin {
                ToolOrigin::Builtin => {
                    let run = self
                        .services
                        .builtins
                        .execute(&call.name, call.arguments.clone());
                    match tokio::time::timeout(deadline, run).await {
                        Ok(result) => result,
                        Err(_) => {
                            return Err(RuntimeError::ToolTransport(format!(
                                "tool '{}' missed its {TOOL_CALL_TIMEOUT_SECS}s deadline",
                                call.name
                            )))
                        }
                    }
                }
                ToolOrigin::Server(server) => {
                    let (_, op) = call.split_name();
                    let run = self.services.servers.call_tool(
                        server,
                        op,
                        call.arguments.clone(),
                        &self.cancel,
                    );
                    match tokio::time::timeout(deadline, run).await {
                        Ok(Ok(payload)) => ToolResult::success(format_payload(&payload)),
                        Ok(Err(ToolCallError::Domain(payload))) => ToolResult {
                            output: format_payload(&payload),
                            is_error: true,
                        },
                        Ok(Err(ToolCallError::Cancelled)) => return Err(RuntimeError::Cancelled),
                        Ok(Err(ToolCallError::Protocol(msg))) => {
                            return Err(RuntimeError::ToolDomain(format!(
                                "server '{server}' returned a malformed response: {msg}"
                            )))
                        }
                        Ok(Err(ToolCallError::Transport(msg))) => {
                            return Err(RuntimeError::ToolTransport(msg))
                        }
                        Err(_) => {
                            return Err(RuntimeError::ToolTransport(format!(
                                "tool '{}' missed its {TOOL_CALL_TIMEOUT_SECS}s deadline",
                                call.name
                            )))
                        }
                    }
                }
            },
        };

        let output = truncate_output(&result.output);
        let record = ToolCallRecord {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output,
            is_error: result.is_error,
            elapsed_ms: started.elapsed().as_millis(),
        };

        self.services
            .trace
            .record_tool_call(
                &self.label,
                &record.name,
                &record.arguments,
                &record.output,
                record.is_error,
            )
            .await;
        let _ = self.services.events.send(AgentEvent::ToolResult {
            label: self.label.clone(),
            name: record.name.clone(),
            is_error: record.is_error,
        });

        Ok(record)
    }

    /// The mode-filtered registry view restricted to this role's
    /// whitelist.
    async fn tool_view(&self) -> Vec<ToolDef> {
        self.services
            .registry
            .active_tools(self.mode)
            .await
            .iter()
            .filter(|descriptor| match &descriptor.origin {
                ToolOrigin::Builtin => match self.spec.allowed_tools {
                    None => true,
                    Some(allowed) => allowed.contains(&descriptor.name.as_str()),
                },
                ToolOrigin::Server(_) => self.spec.allow_server_tools,
            })
            .map(ToolDef::from)
            .collect()
    }

    fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn transition(&self, state: &str) {
        self.services.trace.record_transition(&self.label, state).await;
    }
}

fn push_assistant(messages: &mut Vec<ChatMessage>, text: &str, calls: &[ToolCall]) {
    if text.is_empty() && calls.is_empty() {
        return;
    }
    let mut message = ChatMessage::assistant(text);
    message.tool_calls = calls.iter().map(Into::into).collect();
    messages.push(message);
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let mut boundary = MAX_TOOL_OUTPUT_CHARS.min(output.len());
    while boundary > 0 && !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let truncated = &output[..boundary];
    let break_point = truncated.rfind('\n').unwrap_or(boundary);
    format!(
        "{}\n[... output truncated: {} chars -> {} chars ...]",
        &output[..break_point],
        output.len(),
        break_point
    )
}
