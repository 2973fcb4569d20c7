//! HTTP client for the streaming chat endpoint.
//!
//! `chat_stream` POSTs the request and spawns a reader task that frames
//! the newline-delimited JSON body into [`StreamPart`]s on an unbounded
//! channel. The reader sends an explicit error part if the stream fails,
//! so the receiver never waits on a silently-dead channel.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RuntimeError;

use super::types::{ChatChunk, ChatMetrics, ChatRequest, ToolCall};

/// One event from the model stream.
#[derive(Debug, Clone)]
pub enum StreamPart {
    /// Answer text delta.
    Text(String),
    /// Reasoning text delta.
    Thinking(String),
    /// A fully-formed structured tool call.
    ToolCall(ToolCall),
    /// Terminal metrics from the final chunk.
    Metrics(ChatMetrics),
    /// The endpoint reported an error mid-stream.
    Error(String),
}

/// Client for an Ollama-style `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    host: String,
}

impl ModelClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Start a streaming chat call. Returns the receiving end of the
    /// chunk stream; the HTTP read loop runs on a spawned task.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, RuntimeError> {
        let url = format!("{}/api/chat", self.host);
        debug!(model = %request.model, messages = request.messages.len(), "model request");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RuntimeError::ModelTimeout
                } else {
                    RuntimeError::Model(format!("request to {url} failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Model(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(StreamPart::Error(format!("stream read error: {e}")));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // One JSON document per line.
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if !forward_chunk(line, &tx) {
                        return;
                    }
                }
            }

            // Trailing document without a newline.
            let rest = buffer.trim();
            if !rest.is_empty() {
                forward_chunk(rest, &tx);
            }
        });

        Ok(rx)
    }
}

/// Decode one chunk line and forward its parts. Returns false once the
/// receiver is gone or the stream is logically finished.
fn forward_chunk(line: &str, tx: &mpsc::UnboundedSender<StreamPart>) -> bool {
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(c) => c,
        Err(e) => {
            warn!("undecodable stream chunk: {e}");
            return tx
                .send(StreamPart::Error(format!("undecodable chunk: {e}")))
                .is_ok();
        }
    };

    if let Some(error) = chunk.error.clone() {
        return tx.send(StreamPart::Error(error)).is_ok();
    }

    if let Some(message) = &chunk.message {
        if let Some(thinking) = message.thinking.as_ref().filter(|t| !t.is_empty()) {
            if tx.send(StreamPart::Thinking(thinking.clone())).is_err() {
                return false;
            }
        }
        if let Some(content) = message.content.as_ref().filter(|c| !c.is_empty()) {
            if tx.send(StreamPart::Text(content.clone())).is_err() {
                return false;
            }
        }
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                if tx
                    .send(StreamPart::ToolCall(call.clone().into()))
                    .is_err()
                {
                    return false;
                }
            }
        }
    }

    if let Some(metrics) = chunk.metrics() {
        return tx.send(StreamPart::Metrics(metrics)).is_ok();
    }

    true
}
