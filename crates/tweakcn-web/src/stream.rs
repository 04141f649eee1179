//! UI message stream over server-sent events.
//!
//! Turn events are translated into the chunk protocol the chat client
//! consumes: one JSON object per `data:` line, opened by `start` and, for
//! turns that reach a terminal event, closed by `data: [DONE]`.
//!
//! ```text
//! start
//! text-start / text-delta* / text-end
//! tool-input-available
//! data-generated-theme-styles*       (transient)
//! tool-output-available | tool-output-error
//! message-metadata
//! finish | error
//! [DONE]
//! ```
//!
//! The response body owns a drop guard on the turn's cancellation token, so
//! a client that disconnects cancels the turn and everything nested in it.

use std::collections::VecDeque;
use std::convert::Infallible;

use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tweakcn_ai::{StreamEvent, StreamEventKind};

use crate::error::{ApiError, ApiResult};

/// Header announcing the stream protocol version.
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";

/// Sentinel closing a completed stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One unit written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Json(Value),
    Done,
}

impl Chunk {
    fn into_event(self) -> Event {
        match self {
            Self::Json(value) => Event::default().data(value.to_string()),
            Self::Done => Event::default().data(DONE_SENTINEL),
        }
    }
}

/// Translates turn events into UI message chunks.
#[derive(Debug)]
pub struct UiMessageEncoder {
    message_id: String,
    /// Id of the text block currently open, if any.
    open_text: Option<String>,
    text_blocks: u32,
    started: bool,
    terminated: bool,
}

impl UiMessageEncoder {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            open_text: None,
            text_blocks: 0,
            started: false,
            terminated: false,
        }
    }

    /// Whether a `finish` or `error` chunk has been produced.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn encode(&mut self, event: StreamEvent) -> Vec<Chunk> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        if !self.started {
            self.started = true;
            out.push(Chunk::Json(json!({
                "type": "start",
                "messageId": self.message_id,
            })));
        }

        match event.kind {
            StreamEventKind::TextDelta(delta) => {
                let id = match &self.open_text {
                    Some(id) => id.clone(),
                    None => {
                        let id = format!("{}-text-{}", self.message_id, self.text_blocks);
                        self.text_blocks += 1;
                        self.open_text = Some(id.clone());
                        out.push(Chunk::Json(json!({ "type": "text-start", "id": id })));
                        id
                    }
                };
                out.push(Chunk::Json(json!({
                    "type": "text-delta",
                    "id": id,
                    "delta": delta,
                })));
            }
            StreamEventKind::ToolCall {
                tool_call_id,
                tool,
                input,
            } => {
                self.close_text(&mut out);
                out.push(Chunk::Json(json!({
                    "type": "tool-input-available",
                    "toolCallId": tool_call_id,
                    "toolName": tool.name(),
                    "input": input,
                })));
            }
            StreamEventKind::ToolResult {
                tool_call_id,
                output,
                message_metadata,
                ..
            } => {
                out.push(Chunk::Json(json!({
                    "type": "tool-output-available",
                    "toolCallId": tool_call_id,
                    "output": output,
                })));
                if let Some(metadata) = message_metadata {
                    out.push(Chunk::Json(json!({
                        "type": "message-metadata",
                        "messageMetadata": metadata,
                    })));
                }
            }
            StreamEventKind::ToolError {
                tool_call_id,
                message,
                ..
            } => {
                out.push(Chunk::Json(json!({
                    "type": "tool-output-error",
                    "toolCallId": tool_call_id,
                    "errorText": message,
                })));
            }
            StreamEventKind::Data(data) => {
                out.push(Chunk::Json(json!({
                    "type": format!("data-{}", data.name()),
                    "id": data.id(),
                    "data": data.payload(),
                    "transient": data.transient(),
                })));
            }
            StreamEventKind::Finish { reason, usage } => {
                self.close_text(&mut out);
                out.push(Chunk::Json(json!({
                    "type": "finish",
                    "messageMetadata": {
                        "finishReason": reason,
                        "usage": usage,
                    },
                })));
                out.push(Chunk::Done);
                self.terminated = true;
            }
            StreamEventKind::Error { message } => {
                self.close_text(&mut out);
                out.push(Chunk::Json(json!({ "type": "error", "errorText": message })));
                out.push(Chunk::Done);
                self.terminated = true;
            }
        }
        out
    }

    fn close_text(&mut self, out: &mut Vec<Chunk>) {
        if let Some(id) = self.open_text.take() {
            out.push(Chunk::Json(json!({ "type": "text-end", "id": id })));
        }
    }
}

struct StreamState {
    rx: mpsc::Receiver<StreamEvent>,
    encoder: UiMessageEncoder,
    pending: VecDeque<Chunk>,
    closed: bool,
    _guard: DropGuard,
}

/// Turn a receiver of turn events into an SSE chunk stream.
///
/// The stream ends after `[DONE]`, or when the turn drops its writer without
/// a terminal event (an aborted turn).
pub fn chunk_stream(
    rx: mpsc::Receiver<StreamEvent>,
    first: Option<StreamEvent>,
    encoder: UiMessageEncoder,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let mut state = StreamState {
        rx,
        encoder,
        pending: VecDeque::new(),
        closed: false,
        _guard: cancel.drop_guard(),
    };
    if let Some(event) = first {
        state.pending.extend(state.encoder.encode(event));
    }

    futures::stream::unfold(state, |mut s| async move {
        loop {
            if let Some(chunk) = s.pending.pop_front() {
                return Some((Ok(chunk.into_event()), s));
            }
            if s.closed || s.encoder.is_terminated() {
                return None;
            }
            match s.rx.recv().await {
                Some(event) => s.pending.extend(s.encoder.encode(event)),
                None => {
                    s.closed = true;
                    tracing::debug!("turn ended without a terminal event");
                }
            }
        }
    })
}

/// Wait for the turn's first event, then commit to a streamed response.
///
/// A turn that ends before producing anything was aborted; that is reported
/// as a plain 499 instead of an empty stream.
pub async fn respond(
    mut rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) -> ApiResult<Response> {
    let guard = cancel.clone().drop_guard();
    let first = tokio::select! {
        _ = cancel.cancelled() => None,
        first = rx.recv() => first,
    };
    let Some(first) = first else {
        return Err(ApiError::ClientAborted);
    };
    // Ownership of cancellation moves to the response body.
    guard.disarm();

    let encoder = UiMessageEncoder::new(uuid::Uuid::now_v7().to_string());
    let stream = chunk_stream(rx, Some(first), encoder, cancel);

    let mut resp = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    resp.headers_mut()
        .insert(UI_MESSAGE_STREAM_HEADER, HeaderValue::from_static("v1"));
    Ok(resp)
}
