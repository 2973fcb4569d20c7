//! Stream reader for the agent loop.
//!
//! Consumes [`StreamPart`]s and accumulates the three output streams
//! (answer text, thinking, structured tool calls) separately, forwarding
//! deltas to the session's event channel as they arrive. Returns the
//! accumulated result synchronously on stream close. Full rendering is
//! the consumer's job once the stream ends; this only relays deltas.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::events::AgentEvent;
use crate::constants::STREAM_TIMEOUT_SECS;
use crate::error::RuntimeError;

use super::client::StreamPart;
use super::types::{ChatMetrics, ToolCall};

/// Accumulated result of one complete model stream.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    pub metrics: Option<ChatMetrics>,
}

/// Drain a model stream to completion.
///
/// Fails with `ModelTimeout` if no chunk arrives within the stream
/// timeout, `Cancelled` if the token fires, and `Model` if the endpoint
/// reported an error part.
pub async fn read_stream(
    mut rx: mpsc::UnboundedReceiver<StreamPart>,
    events: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, RuntimeError> {
    let mut outcome = StreamOutcome::default();
    let timeout = Duration::from_secs(STREAM_TIMEOUT_SECS);

    loop {
        let part = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            recv = tokio::time::timeout(timeout, rx.recv()) => match recv {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(_) => return Err(RuntimeError::ModelTimeout),
            },
        };

        match part {
            StreamPart::Text(delta) => {
                outcome.text.push_str(&delta);
                let _ = events.send(AgentEvent::AnswerDelta { text: delta });
            }
            StreamPart::Thinking(delta) => {
                outcome.thinking.push_str(&delta);
                let _ = events.send(AgentEvent::ThinkingDelta { text: delta });
            }
            StreamPart::ToolCall(call) => {
                outcome.tool_calls.push(call);
            }
            StreamPart::Metrics(metrics) => {
                outcome.metrics = Some(metrics);
            }
            StreamPart::Error(error) => {
                return Err(RuntimeError::Model(error));
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channels() -> (
        mpsc::UnboundedSender<StreamPart>,
        mpsc::UnboundedReceiver<StreamPart>,
        mpsc::UnboundedSender<AgentEvent>,
        mpsc::UnboundedReceiver<AgentEvent>,
    ) {
        let (part_tx, part_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (part_tx, part_rx, event_tx, event_rx)
    }

    #[tokio::test]
    async fn accumulates_three_streams_separately() {
        let (part_tx, part_rx, event_tx, _event_rx) = channels();

        part_tx.send(StreamPart::Thinking("hm ".into())).unwrap();
        part_tx.send(StreamPart::Text("hello".into())).unwrap();
        part_tx.send(StreamPart::Text(" world".into())).unwrap();
        part_tx
            .send(StreamPart::ToolCall(ToolCall::new(
                "builtin.read_file",
                json!({"path": "a.txt"}),
            )))
            .unwrap();
        part_tx
            .send(StreamPart::Metrics(ChatMetrics {
                eval_count: 7,
                ..Default::default()
            }))
            .unwrap();
        drop(part_tx);

        let cancel = CancellationToken::new();
        let outcome = read_stream(part_rx, &event_tx, &cancel).await.unwrap();

        assert_eq!(outcome.text, "hello world");
        assert_eq!(outcome.thinking, "hm ");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.metrics.unwrap().eval_count, 7);
    }

    #[tokio::test]
    async fn endpoint_error_fails_the_read() {
        let (part_tx, part_rx, event_tx, _event_rx) = channels();
        part_tx.send(StreamPart::Error("boom".into())).unwrap();
        drop(part_tx);

        let cancel = CancellationToken::new();
        let err = read_stream(part_rx, &event_tx, &cancel).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Model(e) if e == "boom"));
    }

    #[tokio::test]
    async fn cancellation_is_prompt() {
        let (_part_tx, part_rx, event_tx, _event_rx) = channels();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = read_stream(part_rx, &event_tx, &cancel).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled));
    }
}
