//! Run event stream types, emission, and buffering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::types::{ToolCallRequest, ToolOutcome};

use super::types::{ChatResponse, InterruptResponse, TerminalResponse};

/// Concrete event payloads emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEventPayload {
    /// Assistant text from one generation.
    Content { text: String },
    /// A tool call about to be dispatched.
    ToolCall { call: ToolCallRequest },
    /// Outcome of a dispatched call.
    ToolResult {
        call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
    },
    /// Run suspended; terminal for this stream.
    Interrupt(InterruptResponse),
    /// Run completed; terminal for this stream.
    Done(TerminalResponse),
    /// Run failed (streaming only); terminal for this stream.
    Error { message: String },
}

impl LoopEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Interrupt(_) | Self::Done(_) | Self::Error { .. })
    }
}

/// Envelope for streaming run events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: LoopEventPayload,
}

/// Callback used for streaming run events.
pub type EventSink = Arc<dyn Fn(LoopEvent) + Send + Sync>;

/// Stamps payloads with sequence numbers and hands them to a sink.
pub struct EventEmitter {
    seq: AtomicU64,
    sink: Option<EventSink>,
}

impl EventEmitter {
    pub fn new(sink: Option<EventSink>) -> Self {
        Self {
            seq: AtomicU64::new(1),
            sink,
        }
    }

    /// Emitter that drops every event.
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Emitter feeding an unbounded channel, plus the stream reading it.
    pub fn channel() -> (Self, UnboundedReceiverStream<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event| {
            // A dropped receiver means the client went away; the run still finishes.
            let _ = tx.send(event);
        });
        (Self::new(Some(sink)), UnboundedReceiverStream::new(rx))
    }

    pub fn emit(&self, payload: LoopEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(LoopEvent {
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}

/// Collects events so a non-streaming caller gets one response object.
#[derive(Clone, Default)]
pub struct EventBuffer {
    events: Arc<Mutex<Vec<LoopEvent>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        let events = self.events.clone();
        Arc::new(move |event| {
            events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(event);
        })
    }

    pub fn events(&self) -> Vec<LoopEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The terminal payload of the buffered sequence, as a response.
    pub fn collapse(&self) -> Option<ChatResponse> {
        collapse(&self.events())
    }
}

/// Fold an event sequence into the response it terminated with.
pub fn collapse(events: &[LoopEvent]) -> Option<ChatResponse> {
    events.iter().rev().find_map(|event| match &event.payload {
        LoopEventPayload::Done(terminal) => Some(ChatResponse::Terminal(terminal.clone())),
        LoopEventPayload::Interrupt(interrupt) => Some(ChatResponse::Interrupt(interrupt.clone())),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::types::FinishReason;
    use serde_json::json;

    fn done() -> TerminalResponse {
        TerminalResponse {
            content: "hi".into(),
            active_servers: vec![],
            available_tools: vec![],
            finish_reason: FinishReason::Stop,
        }
    }

    #[test]
    fn emitter_numbers_events_in_order() {
        let buffer = EventBuffer::new();
        let emitter = EventEmitter::new(Some(buffer.sink()));
        emitter.emit(LoopEventPayload::Content { text: "a".into() });
        emitter.emit(LoopEventPayload::Done(done()));

        let events = buffer.events();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(buffer.collapse(), Some(ChatResponse::Terminal(done())));
    }

    #[test]
    fn done_event_flattens_terminal_fields() {
        let event = LoopEvent {
            seq: 7,
            timestamp: Utc::now(),
            payload: LoopEventPayload::Done(done()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "done");
        assert_eq!(value["finish_reason"], "stop");
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn tool_result_carries_outcome_tag() {
        let value = serde_json::to_value(LoopEventPayload::ToolResult {
            call_id: "c1".into(),
            tool_name: "search".into(),
            outcome: ToolOutcome::error("boom"),
        })
        .unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["outcome"]["status"], "error");
        assert_eq!(value["call_id"], json!("c1"));
    }

    #[test]
    fn collapse_without_terminal_event_is_none() {
        let events = vec![LoopEvent {
            seq: 1,
            timestamp: Utc::now(),
            payload: LoopEventPayload::Content { text: "x".into() },
        }];
        assert_eq!(collapse(&events), None);
    }

    #[tokio::test]
    async fn channel_emitter_streams_events() {
        use futures::StreamExt;

        let (emitter, mut stream) = EventEmitter::channel();
        emitter.emit(LoopEventPayload::Content { text: "a".into() });
        drop(emitter);
        let first = stream.next().await.unwrap();
        assert_eq!(first.seq, 1);
        assert!(stream.next().await.is_none());
    }
}
