//! The `generateTheme` tool.
//!
//! Runs its own structured-object stream against the configured provider,
//! forwarding each partial theme to the client as a transient
//! `generated-theme-styles` data event with status `streaming`, then exactly
//! one event with status `ready` carrying the validated theme.  The validated
//! theme is the tool's result.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value, json};

use crate::error::{AiError, Result};
use crate::events::{DataEvent, StreamEventKind, ThemeStatus};
use crate::llm::types::{ObjectRequest, ObjectStreamPart, ToolDefinition};
use crate::llm::{LanguageModel, ProviderConfig};
use crate::observability::{Observability, merge_provider_options};
use crate::prompts::GENERATE_THEME_TOOL_SYSTEM;
use crate::theme::{THEME_SCHEMA_NAME, ThemeSchema};
use crate::tools::{Tool, ToolContext, ToolId};

/// Route recorded in traces of the nested object stream.
pub const TOOL_ROUTE: &str = "/api/generate-theme/tool";

/// Run name of the nested object stream.
pub const TOOL_RUN_NAME: &str = "generate-theme-tool";

const DESCRIPTION: &str = "Generates a complete shadcn/ui theme (light and dark) based on the \
current conversation context. Use this tool once you have a clear understanding of the user's \
request, which may include a text prompt, images, an SVG, or a base theme reference \
(@[theme_name]).";

/// Generates a theme from the conversation so far.
pub struct ThemeTool {
    model: Arc<dyn LanguageModel>,
    provider: Arc<ProviderConfig>,
    observability: Observability,
    schema: Arc<ThemeSchema>,
}

impl ThemeTool {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        provider: Arc<ProviderConfig>,
        observability: Observability,
        schema: Arc<ThemeSchema>,
    ) -> Self {
        Self {
            model,
            provider,
            observability,
            schema,
        }
    }

    async fn emit(&self, ctx: &ToolContext<'_>, status: ThemeStatus, theme: Value) -> Result<()> {
        ctx.writer
            .write(StreamEventKind::Data(DataEvent::GeneratedThemeStyles {
                tool_call_id: ctx.tool_call_id.to_owned(),
                status,
                theme_styles: theme,
            }))
            .await
    }
}

#[async_trait]
impl Tool for ThemeTool {
    fn id(&self) -> ToolId {
        ToolId::GenerateTheme
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.id().name().to_owned(),
            description: DESCRIPTION.to_owned(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value, ctx: ToolContext<'_>) -> Result<Value> {
        let trace_ctx = ctx.request.for_route(TOOL_ROUTE);
        let mut extra = Map::new();
        extra.insert("provider".into(), json!(self.provider.provider_name()));
        extra.insert("modelId".into(), json!(self.provider.model_id()));
        let trace = self
            .observability
            .trace_options(&trace_ctx, TOOL_RUN_NAME, extra);

        let request = ObjectRequest {
            model: self.provider.model(),
            system: Some(GENERATE_THEME_TOOL_SYSTEM.to_owned()),
            messages: ctx.messages.to_vec(),
            schema_name: THEME_SCHEMA_NAME.to_owned(),
            schema: self.schema.as_json().clone(),
            provider_options: merge_provider_options(self.provider.options(), trace.as_ref()),
        };

        let mut stream = self.model.stream_object(request, ctx.cancel.clone()).await?;
        let mut object: Option<Value> = None;
        let mut partials = 0u32;

        loop {
            let next = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AiError::Aborted),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(ObjectStreamPart::Partial(partial))) => {
                    partials += 1;
                    self.emit(&ctx, ThemeStatus::Streaming, partial).await?;
                }
                Some(Ok(ObjectStreamPart::Finish { object: done, usage })) => {
                    tracing::debug!(
                        tool_call_id = %ctx.tool_call_id,
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "theme object stream finished"
                    );
                    object = Some(done);
                }
            }
        }

        let object = object.ok_or_else(|| AiError::LlmStreamError {
            reason: "theme stream ended without a final object".into(),
        })?;
        let styles = self.schema.validate(&object)?;
        let theme = serde_json::to_value(&styles)?;

        self.emit(&ctx, ThemeStatus::Ready, theme.clone()).await?;

        tracing::info!(
            tool_call_id = %ctx.tool_call_id,
            partials,
            request_id = ctx.request.request_id.as_deref().unwrap_or("-"),
            "theme generated"
        );

        Ok(theme)
    }
}
