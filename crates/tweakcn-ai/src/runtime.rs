//! Tool-augmented streaming loop for theme generation.
//!
//! Each step streams one completion from the model, forwarding text deltas
//! as they arrive.  If the model asks for tools, they run one after another
//! (their events must not interleave), their results are appended to the
//! conversation and the next step begins.  The loop ends when the model
//! answers without tool calls or the step cap is reached.
//!
//! ```text
//! Start ──> Streaming ──> Tool Execution ──> Streaming ──> ... ──> Finish
//!               │               │
//!               └──> Aborted <──┘       (any failure) ──> Error
//! ```

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;
use tweakcn_store::UsageLedger;

use crate::context::RequestContext;
use crate::error::{AiError, Result};
use crate::events::{EventWriter, StreamEventKind};
use crate::llm::types::{FinishReason, Message, ModelRequest, TextStreamPart, ToolCall, Usage};
use crate::llm::{LanguageModel, ProviderConfig, ProviderOptions};
use crate::observability::{Observability, merge_provider_options};
use crate::prompts::GENERATE_THEME_SYSTEM;
use crate::tools::{Tool, ToolContext, ToolRegistry};
use crate::usage::record_usage;

/// Maximum number of model calls in one turn.
pub const MAX_STEPS: u32 = 5;

/// Route of the theme-generation endpoint, as recorded in traces.
pub const THEME_ROUTE: &str = "/api/generate-theme";

/// Run name of the top-level theme conversation.
pub const THEME_RUN_NAME: &str = "generate-theme";

/// Message shown to the user when a theme turn fails.
pub const THEME_FAILURE_MESSAGE: &str = "Failed to generate theme. Please try again.";

/// Tunables for one turn.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Step cap.  Prevents endless tool loops.
    pub max_steps: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    Finished { usage: Usage, steps: u32 },
    /// The client went away.  Not a failure; no usage is recorded.
    Aborted,
    Failed(AiError),
}

/// Await the next stream item unless the turn is cancelled first.
pub(crate) async fn next_or_abort<S>(
    stream: &mut S,
    cancel: &CancellationToken,
) -> Result<Option<S::Item>>
where
    S: Stream + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(AiError::Aborted),
        item = stream.next() => Ok(item),
    }
}

/// Output of a single model step.
#[derive(Default)]
struct StepOutput {
    text: String,
    tool_calls: Vec<(ToolCall, Arc<dyn Tool>)>,
    reason: FinishReason,
    usage: Usage,
}

/// Everything a theme turn needs, built once and shared across requests.
#[derive(Clone)]
pub struct ThemeTurn {
    model: Arc<dyn LanguageModel>,
    provider: Arc<ProviderConfig>,
    observability: Observability,
    tools: ToolRegistry,
    ledger: Option<Arc<dyn UsageLedger>>,
    config: TurnConfig,
}

impl ThemeTurn {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        provider: Arc<ProviderConfig>,
        observability: Observability,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            model,
            provider,
            observability,
            tools,
            ledger: None,
            config: TurnConfig::default(),
        }
    }

    /// Record usage of finished turns in `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Run a turn to completion, writing events to `writer`.
    ///
    /// `message_count` is the number of client messages, recorded in traces.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        message_count: usize,
        writer: EventWriter,
    ) -> TurnOutcome {
        let cancel = writer.cancel_token().clone();

        let mut extra = Map::new();
        extra.insert("messageCount".into(), json!(message_count));
        let trace = self
            .observability
            .trace_options(ctx, THEME_RUN_NAME, extra);
        let options = merge_provider_options(self.provider.options(), trace.as_ref());

        tracing::info!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            conversation_id = ctx.conversation_id.as_deref().unwrap_or("-"),
            provider = %ctx.provider,
            model = %ctx.model_id,
            messages = message_count,
            max_steps = self.config.max_steps,
            "starting theme turn"
        );

        match self.drive(ctx, messages, options, &writer, &cancel).await {
            Ok(_) if cancel.is_cancelled() => TurnOutcome::Aborted,
            Ok((reason, usage, steps)) => {
                if let Some(ledger) = &self.ledger {
                    record_usage(
                        ledger.as_ref(),
                        ctx.user_id.as_deref(),
                        self.provider.model_id(),
                        usage,
                    )
                    .await;
                }
                match writer.write(StreamEventKind::Finish { reason, usage }).await {
                    Ok(()) => {
                        tracing::info!(
                            steps,
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "theme turn finished"
                        );
                        TurnOutcome::Finished { usage, steps }
                    }
                    Err(_) => TurnOutcome::Aborted,
                }
            }
            Err(AiError::Aborted) => {
                tracing::info!(status = 499, "theme turn aborted by client");
                TurnOutcome::Aborted
            }
            Err(e) => {
                tracing::error!(error = %e, route = THEME_ROUTE, "theme turn failed");
                let _ = writer
                    .write(StreamEventKind::Error {
                        message: THEME_FAILURE_MESSAGE.into(),
                    })
                    .await;
                TurnOutcome::Failed(e)
            }
        }
    }

    /// The step loop.  Returns the last finish reason, total usage and the
    /// number of steps taken.
    async fn drive(
        &self,
        ctx: &RequestContext,
        mut conversation: Vec<Message>,
        options: ProviderOptions,
        writer: &EventWriter,
        cancel: &CancellationToken,
    ) -> Result<(FinishReason, Usage, u32)> {
        let definitions = self.tools.definitions();
        let mut total = Usage::default();

        for step in 1..=self.config.max_steps {
            tracing::debug!(step, "theme turn step start");

            let request = ModelRequest {
                model: self.provider.model(),
                system: Some(GENERATE_THEME_SYSTEM.to_owned()),
                messages: conversation.clone(),
                tools: definitions.clone(),
                provider_options: options.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let output = self.step(request, writer, cancel).await?;
            total += output.usage;

            let calls: Vec<ToolCall> = output.tool_calls.iter().map(|(c, _)| c.clone()).collect();
            let prompt_len = conversation.len();
            conversation.push(Message::assistant_tool_calls(output.text, calls));

            if output.tool_calls.is_empty() {
                return Ok((output.reason, total, step));
            }

            tracing::info!(
                step,
                tools = ?output.tool_calls.iter().map(|(c, _)| &c.name).collect::<Vec<_>>(),
                "model requested tool calls"
            );

            let results = self
                .execute_tools(
                    ctx,
                    &output.tool_calls,
                    &conversation[..prompt_len],
                    writer,
                    cancel,
                )
                .await?;
            conversation.extend(results);

            if step == self.config.max_steps {
                tracing::warn!(max_steps = step, "step cap reached, ending turn");
                return Ok((output.reason, total, step));
            }
        }

        // Only reachable with a zero step cap.
        Ok((FinishReason::Other, total, 0))
    }

    /// Stream one completion, forwarding text and tool calls.
    async fn step(
        &self,
        request: ModelRequest,
        writer: &EventWriter,
        cancel: &CancellationToken,
    ) -> Result<StepOutput> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AiError::Aborted),
            stream = self.model.stream_text(request, cancel.clone()) => stream?,
        };

        let mut output = StepOutput::default();
        let mut finished = false;

        while let Some(part) = next_or_abort(&mut stream, cancel).await? {
            match part? {
                TextStreamPart::TextDelta(delta) => {
                    output.text.push_str(&delta);
                    writer.write(StreamEventKind::TextDelta(delta)).await?;
                }
                TextStreamPart::ToolCall(call) => {
                    let tool = self.tools.resolve(&call.name).ok_or_else(|| {
                        AiError::UnknownTool {
                            tool_name: call.name.clone(),
                        }
                    })?;
                    writer
                        .write(StreamEventKind::ToolCall {
                            tool_call_id: call.id.clone(),
                            tool: tool.id(),
                            input: call.arguments.clone(),
                        })
                        .await?;
                    output.tool_calls.push((call, tool));
                }
                TextStreamPart::Finish { reason, usage } => {
                    output.reason = reason;
                    output.usage = usage;
                    finished = true;
                }
            }
        }

        if !finished {
            return Err(AiError::LlmStreamError {
                reason: "stream ended before the model finished".into(),
            });
        }
        Ok(output)
    }

    /// Run the requested tools in order and build their result messages.
    ///
    /// A failing tool does not end the turn: the failure is reported to the
    /// client and fed back to the model.  Cancellation does end it.
    async fn execute_tools(
        &self,
        ctx: &RequestContext,
        calls: &[(ToolCall, Arc<dyn Tool>)],
        conversation: &[Message],
        writer: &EventWriter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let mut results = Vec::with_capacity(calls.len());

        for (call, tool) in calls {
            tracing::debug!(tool = %tool.id(), id = %call.id, "executing tool");

            let tool_ctx = ToolContext {
                tool_call_id: &call.id,
                messages: conversation,
                writer,
                cancel,
                request: ctx,
            };

            match tool.execute(call.arguments.clone(), tool_ctx).await {
                Ok(output) => {
                    writer
                        .write(StreamEventKind::ToolResult {
                            tool_call_id: call.id.clone(),
                            tool: tool.id(),
                            message_metadata: tool.id().result_metadata(&output),
                            output: output.clone(),
                        })
                        .await?;
                    results.push(Message::tool_result(&call.id, output.to_string()));
                }
                Err(AiError::Aborted) => return Err(AiError::Aborted),
                Err(e) => {
                    tracing::warn!(tool = %tool.id(), error = %e, "tool execution failed");
                    writer
                        .write(StreamEventKind::ToolError {
                            tool_call_id: call.id.clone(),
                            tool: tool.id(),
                            message: THEME_FAILURE_MESSAGE.into(),
                        })
                        .await?;
                    // Provider failures end the turn; upstream text never
                    // reaches the model.
                    if e.is_provider() {
                        return Err(e);
                    }
                    results.push(Message::tool_result(&call.id, tool_feedback(&e)));
                }
            }
        }

        Ok(results)
    }
}

/// Tool result text for a recoverable tool failure.
fn tool_feedback(err: &AiError) -> String {
    match err {
        AiError::SchemaValidation { reason } => {
            format!("Error: the generated theme was invalid ({reason}). Try again.")
        }
        _ => "Error: the tool failed. Try again.".to_owned(),
    }
}
