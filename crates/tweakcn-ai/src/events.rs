//! Events streamed from a turn to the caller.
//!
//! Producers write through an [`EventWriter`], which stamps every event with
//! the request and conversation ids of the request that produced it and
//! stops accepting writes once the turn is cancelled.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::{AiError, Result};
use crate::llm::types::{FinishReason, Usage};
use crate::tools::ToolId;

/// Capacity of the event channel between a turn and its transport.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Progress of a streamed theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeStatus {
    Streaming,
    Ready,
}

/// Custom structured data sent alongside the text.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    /// A partial or final theme from the `generateTheme` tool.  Transient:
    /// clients render it but do not keep it in message history.
    GeneratedThemeStyles {
        tool_call_id: String,
        status: ThemeStatus,
        theme_styles: Value,
    },
}

impl DataEvent {
    /// Name of the data part on the wire (after the `data-` prefix).
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneratedThemeStyles { .. } => "generated-theme-styles",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::GeneratedThemeStyles { tool_call_id, .. } => tool_call_id,
        }
    }

    pub fn transient(&self) -> bool {
        match self {
            Self::GeneratedThemeStyles { .. } => true,
        }
    }

    /// The data payload.
    pub fn payload(&self) -> Value {
        match self {
            Self::GeneratedThemeStyles {
                status,
                theme_styles,
                ..
            } => serde_json::json!({ "status": status, "themeStyles": theme_styles }),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    TextDelta(String),
    ToolCall {
        tool_call_id: String,
        tool: ToolId,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool: ToolId,
        output: Value,
        /// Message-level metadata chosen by tool identity.
        message_metadata: Option<Value>,
    },
    /// A tool failed; the model sees the failure and may recover.
    ToolError {
        tool_call_id: String,
        tool: ToolId,
        message: String,
    },
    Data(DataEvent),
    Finish {
        reason: FinishReason,
        usage: Usage,
    },
    /// A failure, with a message safe to show the user.
    Error {
        message: String,
    },
}

/// One event of a turn, correlated to its request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub request_id: Option<String>,
    pub conversation_id: Option<String>,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StreamEventKind::Finish { .. } | StreamEventKind::Error { .. }
        )
    }
}

/// The producing half of a turn's event stream.
#[derive(Debug, Clone)]
pub struct EventWriter {
    tx: mpsc::Sender<StreamEvent>,
    request_id: Option<String>,
    conversation_id: Option<String>,
    cancel: CancellationToken,
}

impl EventWriter {
    /// Create a writer for `ctx` and the matching receiver.
    pub fn channel(
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let writer = Self {
            tx,
            request_id: ctx.request_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            cancel,
        };
        (writer, rx)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send one event.
    ///
    /// Fails with [`AiError::Aborted`] once the turn is cancelled or the
    /// receiver is gone; in the latter case the turn is cancelled too so
    /// nested work stops.
    pub async fn write(&self, kind: StreamEventKind) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AiError::Aborted);
        }
        let event = StreamEvent {
            request_id: self.request_id.clone(),
            conversation_id: self.conversation_id.clone(),
            kind,
        };
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return Err(AiError::Aborted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ModelHandle, ProviderConfig, ProviderKind};

    fn ctx() -> RequestContext {
        let provider = ProviderConfig::from_model(ModelHandle {
            kind: ProviderKind::Google,
            provider_name: "google".into(),
            model_id: "gemini-2.5-flash".into(),
            base_url: "http://localhost".into(),
            api_key: "k".into(),
        });
        RequestContext::new("/api/generate-theme", &provider)
            .with_correlation(Some("r1".into()), Some("c1".into()))
    }

    #[tokio::test]
    async fn events_carry_request_identifiers() {
        let (writer, mut rx) = EventWriter::channel(&ctx(), CancellationToken::new());
        writer
            .write(StreamEventKind::TextDelta("hi".into()))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id.as_deref(), Some("r1"));
        assert_eq!(event.conversation_id.as_deref(), Some("c1"));
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn no_writes_after_cancel() {
        let cancel = CancellationToken::new();
        let (writer, mut rx) = EventWriter::channel(&ctx(), cancel.clone());
        cancel.cancel();
        let err = writer
            .write(StreamEventKind::TextDelta("late".into()))
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        drop(writer);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_turn() {
        let cancel = CancellationToken::new();
        let (writer, rx) = EventWriter::channel(&ctx(), cancel.clone());
        drop(rx);
        assert!(
            writer
                .write(StreamEventKind::TextDelta("x".into()))
                .await
                .is_err()
        );
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn theme_data_payload_shape() {
        let event = DataEvent::GeneratedThemeStyles {
            tool_call_id: "call_1".into(),
            status: ThemeStatus::Streaming,
            theme_styles: serde_json::json!({"light": {}}),
        };
        assert_eq!(event.name(), "generated-theme-styles");
        assert_eq!(event.id(), "call_1");
        assert!(event.transient());
        assert_eq!(event.payload()["status"], "streaming");
        assert_eq!(event.payload()["themeStyles"]["light"], serde_json::json!({}));
    }
}
