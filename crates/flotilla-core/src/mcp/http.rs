//! HTTP-class transports: server-sent events and streamable HTTP.
//!
//! Both carry JSON-RPC documents and correlate responses by request id.
//! The SSE variant holds one long-lived GET event stream open and POSTs
//! requests out-of-band; the streamable variant POSTs each request and
//! reads its streamed response body. Every outgoing request goes through
//! the header policy in [`super::headers`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::constants::SERVER_REQUEST_TIMEOUT_SECS;
use crate::error::{RuntimeError, ToolCallError};

use super::config::TransportKind;
use super::headers::{normalized_headers, to_header_map};
use super::protocol::{decode_response, RemoteToolDef, RpcRequest, RpcResponse, ToolsListResult};
use super::session::{SessionStatus, ToolServerSession};

type Pending = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value, ToolCallError>>>>>;

pub struct HttpSession {
    name: String,
    kind: TransportKind,
    url: String,
    headers: HashMap<String, String>,
    http: reqwest::Client,
    next_id: AtomicI64,
    /// Response routing for the SSE event stream. Unused for streamable
    /// HTTP, where each call reads its own response body.
    pending: Pending,
    shutdown: CancellationToken,
    status: std::sync::RwLock<SessionStatus>,
}

impl HttpSession {
    pub async fn connect(
        name: &str,
        url: &str,
        user_headers: &HashMap<String, String>,
        kind: TransportKind,
    ) -> Result<Self, RuntimeError> {
        if kind == TransportKind::Stdio {
            return Err(RuntimeError::TransportConfig(format!(
                "server '{name}': stdio is not an HTTP transport"
            )));
        }

        let session = Self {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            headers: normalized_headers(user_headers),
            http: reqwest::Client::new(),
            next_id: AtomicI64::new(1),
            pending: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            status: std::sync::RwLock::new(SessionStatus::Connecting),
        };

        if kind == TransportKind::Sse {
            session.open_event_stream().await?;
        }

        session.set_status(SessionStatus::Ready);
        info!(server = name, transport = %kind, url, "connected tool server");
        Ok(session)
    }

    /// Open the long-lived GET event stream and spawn its reader.
    async fn open_event_stream(&self) -> Result<(), RuntimeError> {
        let response = self
            .http
            .get(&self.url)
            .headers(to_header_map(&self.headers))
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                RuntimeError::TransportConfig(format!(
                    "server '{}': event stream open failed: {e}",
                    self.name
                ))
            })?;

        if !response.status().is_success() {
            return Err(RuntimeError::TransportConfig(format!(
                "server '{}': event stream returned {}",
                self.name,
                response.status()
            )));
        }

        let pending = Arc::clone(&self.pending);
        let shutdown = self.shutdown.clone();
        let name = self.name.clone();
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            loop {
                let chunk = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    chunk = body.next() => chunk,
                };

                let bytes = match chunk {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        error!(server = %name, "event stream read error: {e}");
                        fail_pending(&pending, "connection lost").await;
                        break;
                    }
                    None => {
                        error!(server = %name, "event stream ended");
                        fail_pending(&pending, "connection lost").await;
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    if let Some(payload) = frame_line(&line) {
                        dispatch(&payload, &pending).await;
                    }
                }
            }
        });

        Ok(())
    }

    fn set_status(&self, status: SessionStatus) {
        if let Ok(mut guard) = self.status.write() {
            *guard = status;
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        match self.kind {
            TransportKind::Sse => self.request_over_event_stream(request, cancel).await,
            TransportKind::StreamableHttp => self.request_streamed(request, cancel).await,
            TransportKind::Stdio => unreachable!("rejected at connect"),
        }
    }

    /// POST the request; the response arrives on the event stream.
    async fn request_over_event_stream(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        let post = self
            .http
            .post(&self.url)
            .headers(to_header_map(&self.headers))
            .json(&request)
            .send()
            .await;

        match post {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                self.pending.write().await.remove(&id);
                return Err(ToolCallError::Transport(format!(
                    "request rejected with {}",
                    response.status()
                )));
            }
            Err(e) => {
                self.pending.write().await.remove(&id);
                return Err(ToolCallError::Transport(format!("request failed: {e}")));
            }
        }

        let deadline = Duration::from_secs(SERVER_REQUEST_TIMEOUT_SECS);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.pending.write().await.remove(&id);
                Err(ToolCallError::Cancelled)
            }
            result = tokio::time::timeout(deadline, rx) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(ToolCallError::Transport("response channel dropped".into())),
                Err(_) => {
                    self.pending.write().await.remove(&id);
                    Err(ToolCallError::Transport(format!(
                        "no response within {SERVER_REQUEST_TIMEOUT_SECS}s"
                    )))
                }
            }
        }
    }

    /// POST the request and scan its streamed response body for the
    /// correlated response document.
    async fn request_streamed(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        let id = request.id;
        let deadline = Duration::from_secs(SERVER_REQUEST_TIMEOUT_SECS);

        let read = async {
            let response = self
                .http
                .post(&self.url)
                .headers(to_header_map(&self.headers))
                .json(&request)
                .send()
                .await
                .map_err(|e| ToolCallError::Transport(format!("request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(ToolCallError::Transport(format!(
                    "request rejected with {}",
                    response.status()
                )));
            }

            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let bytes =
                    chunk.map_err(|e| ToolCallError::Transport(format!("body read error: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let Some(payload) = frame_line(&line) else {
                        continue;
                    };
                    let response: RpcResponse = serde_json::from_str(&payload)
                        .map_err(|e| ToolCallError::Protocol(format!("bad response: {e}")))?;
                    if response.id == Some(id) {
                        return decode_response(response);
                    }
                }
            }

            Err(ToolCallError::Transport(
                "body ended before the response arrived".into(),
            ))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ToolCallError::Cancelled),
            result = tokio::time::timeout(deadline, read) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolCallError::Transport(format!(
                    "no response within {SERVER_REQUEST_TIMEOUT_SECS}s"
                ))),
            }
        }
    }
}

#[async_trait]
impl ToolServerSession for HttpSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> SessionStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(SessionStatus::Failed)
    }

    async fn list_tools(&self) -> Result<Vec<RemoteToolDef>, ToolCallError> {
        let cancel = CancellationToken::new();
        let result = self
            .request(RpcRequest::list_tools(self.next_id()), &cancel)
            .await?;
        let listing: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ToolCallError::Protocol(format!("bad list_tools result: {e}")))?;
        Ok(listing.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        self.set_status(SessionStatus::Calling);
        let result = self
            .request(RpcRequest::call_tool(self.next_id(), name, args), cancel)
            .await;
        self.set_status(SessionStatus::Ready);
        result
    }

    async fn close(&self) {
        self.set_status(SessionStatus::Closing);
        self.shutdown.cancel();
        fail_pending(&self.pending, "session closed").await;
        self.set_status(SessionStatus::Closed);
    }
}

/// Frame one line of an event or NDJSON stream into a JSON payload.
/// `data:` prefixes are stripped; comments, event metadata, and blank
/// lines yield nothing.
fn frame_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        return (!data.is_empty()).then(|| data.to_string());
    }
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return None;
    }
    line.starts_with('{').then(|| line.to_string())
}

async fn dispatch(payload: &str, pending: &Pending) {
    let response: RpcResponse = match serde_json::from_str(payload) {
        Ok(r) => r,
        Err(e) => {
            debug!("undecodable event payload: {e}");
            return;
        }
    };

    let Some(id) = response.id else { return };
    if let Some(tx) = pending.write().await.remove(&id) {
        let _ = tx.send(decode_response(response));
    }
}

async fn fail_pending(pending: &Pending, reason: &str) {
    let mut pending = pending.write().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ToolCallError::Transport(reason.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_line_strips_sse_prefixes() {
        assert_eq!(frame_line("data: {\"id\":1}").as_deref(), Some("{\"id\":1}"));
        assert_eq!(frame_line("{\"id\":1}").as_deref(), Some("{\"id\":1}"));
        assert_eq!(frame_line("event: message"), None);
        assert_eq!(frame_line("id: 7"), None);
        assert_eq!(frame_line(": keepalive"), None);
        assert_eq!(frame_line(""), None);
        assert_eq!(frame_line("retry: 500"), None);
    }
}
