//! The uniform session contract over the three transports.
//!
//! The registry and executor hold a `ToolServerSession` handle per server
//! and never branch on transport kind.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ToolCallError;

use super::protocol::RemoteToolDef;

/// Lifecycle state of one server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Ready,
    Calling,
    Closing,
    Closed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Calling => "calling",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One connected tool server, regardless of transport.
///
/// `call_tool` fails with `Transport` on connection loss (retryable),
/// `Protocol` on a malformed response, and `Domain` with the server's
/// structured payload on domain failure. All implementations are
/// cancellable mid-call via the token.
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> SessionStatus;

    async fn list_tools(&self) -> Result<Vec<RemoteToolDef>, ToolCallError>;

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolCallError>;

    async fn close(&self);
}
