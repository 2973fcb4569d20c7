//! Child-process transport.
//!
//! Spawns the server and speaks newline-delimited JSON over its stdio.
//! A background task owns the read side and routes responses to pending
//! requests by id; calls are serialized through a gate because a
//! subprocess session is pooled one-per-server.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::constants::SERVER_REQUEST_TIMEOUT_SECS;
use crate::error::{RuntimeError, ToolCallError};

use super::protocol::{decode_response, RpcRequest, RpcResponse, ToolsListResult};
use super::session::{SessionStatus, ToolServerSession};

type Pending = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value, ToolCallError>>>>>;

pub struct StdioSession {
    name: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    next_id: AtomicI64,
    pending: Pending,
    call_gate: Mutex<()>,
    shutdown: CancellationToken,
    status: std::sync::RwLock<SessionStatus>,
}

impl StdioSession {
    /// Spawn the server process and start the receive loop.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self, RuntimeError> {
        info!(server = name, command, "spawning tool server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(working_dir)
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::TransportConfig(format!(
                    "command not found for server '{name}': {command}"
                ))
            } else {
                RuntimeError::TransportConfig(format!("failed to spawn '{command}': {e}"))
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::TransportConfig(format!("server '{name}' has no stdin")))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RuntimeError::TransportConfig(format!("server '{name}' has no stdout"))
        })?;

        let pending: Pending = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let recv_pending = Arc::clone(&pending);
        let recv_shutdown = shutdown.clone();
        let recv_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = recv_shutdown.cancelled() => {
                        debug!(server = %recv_name, "receive loop shutting down");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            // Servers sometimes write diagnostics to stdout.
                            if line.is_empty() || !line.starts_with('{') {
                                continue;
                            }
                            dispatch_line(line, &recv_pending).await;
                        }
                        Ok(None) | Err(_) => {
                            error!(server = %recv_name, "tool server closed its stdout");
                            fail_pending(&recv_pending, "connection lost").await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            next_id: AtomicI64::new(1),
            pending,
            call_gate: Mutex::new(()),
            shutdown,
            status: std::sync::RwLock::new(SessionStatus::Ready),
        })
    }

    fn set_status(&self, status: SessionStatus) {
        if let Ok(mut guard) = self.status.write() {
            *guard = status;
        }
    }

    async fn request(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError> {
        let _gate = self.call_gate.lock().await;
        let id = request.id;

        let json = serde_json::to_string(&request)
            .map_err(|e| ToolCallError::Protocol(format!("unencodable request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        {
            let mut stdin = self.stdin.lock().await;
            let write = async {
                stdin.write_all(json.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                self.pending.write().await.remove(&id);
                return Err(ToolCallError::Transport(format!(
                    "write to server '{}' failed: {e}",
                    self.name
                )));
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
                        "request timed out after {SERVER_REQUEST_TIMEOUT_SECS}s"
                    )))
                }
            }
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServerSession for StdioSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> SessionStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(SessionStatus::Failed)
    }

    async fn list_tools(&self) -> Result<Vec<super::protocol::RemoteToolDef>, ToolCallError> {
        let cancel = CancellationToken::new();
        let result = self
            .request(RpcRequest::list_tools(self.next_id()), &cancel)
            .await?;
        let listing: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ToolCallError::Protocol(format!("bad list_tools result: {e}")))?;
        debug!(server = %self.name, tools = listing.tools.len(), "listed tools");
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
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        self.set_status(SessionStatus::Closed);
    }
}

async fn dispatch_line(line: &str, pending: &Pending) {
    let response: RpcResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!("undecodable server line: {e}");
            return;
        }
    };

    if let Some(method) = &response.method {
        debug!(method = %method, "ignoring server notification");
        return;
    }

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
