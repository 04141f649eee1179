//! Prompt enhancement.
//!
//! A single tool-less completion that rewrites the user's prompt, streamed
//! back one word at a time.

use std::sync::Arc;

use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::{AiError, Result};
use crate::events::{EventWriter, StreamEventKind};
use crate::llm::types::{FinishReason, Message, ModelRequest, TextStreamPart, Usage};
use crate::llm::{LanguageModel, ProviderConfig};
use crate::observability::{Observability, merge_provider_options};
use crate::prompt::{PromptData, build_user_content_parts};
use crate::prompts::ENHANCE_PROMPT_SYSTEM;
use crate::runtime::{TurnOutcome, next_or_abort};
use crate::smooth::{SMOOTH_DELAY, WordChunker};

/// Route of the prompt-enhancement endpoint.
pub const ENHANCE_ROUTE: &str = "/api/enhance-prompt";

/// Run name of the enhancement call.
pub const ENHANCE_RUN_NAME: &str = "enhance-prompt";

/// Message shown to the user when enhancement fails.
pub const ENHANCE_FAILURE_MESSAGE: &str = "Failed to enhance prompt. Please try again.";

/// Everything an enhancement needs, built once and shared across requests.
#[derive(Clone)]
pub struct EnhanceTurn {
    model: Arc<dyn LanguageModel>,
    provider: Arc<ProviderConfig>,
    observability: Observability,
}

impl EnhanceTurn {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        provider: Arc<ProviderConfig>,
        observability: Observability,
    ) -> Self {
        Self {
            model,
            provider,
            observability,
        }
    }

    /// Stream an enhanced version of `prompt` to `writer`.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        prompt: &PromptData,
        writer: EventWriter,
    ) -> TurnOutcome {
        let cancel = writer.cancel_token().clone();

        match self.drive(ctx, prompt, &writer, &cancel).await {
            Ok(_) if cancel.is_cancelled() => TurnOutcome::Aborted,
            Ok((reason, usage)) => {
                match writer.write(StreamEventKind::Finish { reason, usage }).await {
                    Ok(()) => TurnOutcome::Finished { usage, steps: 1 },
                    Err(_) => TurnOutcome::Aborted,
                }
            }
            Err(AiError::Aborted) => {
                tracing::info!(status = 499, "prompt enhancement aborted by client");
                TurnOutcome::Aborted
            }
            Err(e) => {
                tracing::error!(error = %e, route = ENHANCE_ROUTE, "prompt enhancement failed");
                let _ = writer
                    .write(StreamEventKind::Error {
                        message: ENHANCE_FAILURE_MESSAGE.into(),
                    })
                    .await;
                TurnOutcome::Failed(e)
            }
        }
    }

    async fn drive(
        &self,
        ctx: &RequestContext,
        prompt: &PromptData,
        writer: &EventWriter,
        cancel: &CancellationToken,
    ) -> Result<(FinishReason, Usage)> {
        let mut extra = Map::new();
        extra.insert("promptLengthChars".into(), json!(prompt.content.chars().count()));
        extra.insert("mentionCount".into(), json!(prompt.mentions.len()));
        extra.insert("imageCount".into(), json!(prompt.images.len()));
        let trace = self
            .observability
            .trace_options(ctx, ENHANCE_RUN_NAME, extra);

        let request = ModelRequest::new(
            self.provider.model(),
            vec![Message::user_parts(build_user_content_parts(prompt))],
        )
        .with_system(ENHANCE_PROMPT_SYSTEM)
        .with_provider_options(merge_provider_options(
            self.provider.options(),
            trace.as_ref(),
        ));

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AiError::Aborted),
            stream = self.model.stream_text(request, cancel.clone()) => stream?,
        };

        let mut chunker = WordChunker::new()?;
        let mut finish = None;

        while let Some(part) = next_or_abort(&mut stream, cancel).await? {
            match part? {
                TextStreamPart::TextDelta(delta) => {
                    for chunk in chunker.push(&delta) {
                        paced_write(writer, cancel, chunk).await?;
                    }
                }
                TextStreamPart::ToolCall(call) => {
                    tracing::debug!(tool = %call.name, "ignoring tool call during enhancement");
                }
                TextStreamPart::Finish { reason, usage } => finish = Some((reason, usage)),
            }
        }

        if let Some(rest) = chunker.flush() {
            writer.write(StreamEventKind::TextDelta(rest)).await?;
        }

        finish.ok_or_else(|| AiError::LlmStreamError {
            reason: "stream ended before the model finished".into(),
        })
    }
}

/// Write one smoothed chunk after the pacing delay.
async fn paced_write(writer: &EventWriter, cancel: &CancellationToken, chunk: String) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => return Err(AiError::Aborted),
        _ = tokio::time::sleep(SMOOTH_DELAY) => {}
    }
    writer.write(StreamEventKind::TextDelta(chunk)).await
}
