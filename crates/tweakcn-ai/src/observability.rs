//! Optional tracing around LLM calls.
//!
//! When `AI_TRACING` is on, every call through the four [`LanguageModel`]
//! entry points runs inside a `tracing` span carrying a run name, a metadata
//! record and a fixed set of tags.  Callers attach this information per call
//! as [`TraceOptions`], merged into the provider options under the `tracing`
//! key.  When tracing is off no options are produced and the model is used
//! unwrapped.
//!
//! The method set (wrapped or not) is chosen once at startup by
//! [`Observability::wrap`] and handed to handlers through application state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::AppEnv;
use crate::context::RequestContext;
use crate::error::Result;
use crate::llm::types::{ObjectStreamPart, TextStreamPart};
use crate::llm::{
    GeneratedObject, GeneratedText, LanguageModel, ModelRequest, ObjectRequest, ObjectStream,
    ProviderOptions, TextStream,
};

/// Key under which trace options travel inside provider options.
pub const TRACING_OPTIONS_KEY: &str = "tracing";

/// Per-call trace information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceOptions {
    pub name: String,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
}

/// Tracing switch plus the environment name used in tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observability {
    enabled: bool,
    env: AppEnv,
}

impl Observability {
    pub fn new(enabled: bool, env: AppEnv) -> Self {
        Self { enabled, env }
    }

    /// Tracing off.
    pub fn disabled() -> Self {
        Self::new(false, AppEnv::default())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Tags attached to every run: environment, route, provider and model.
    pub fn tags(&self, ctx: &RequestContext) -> Vec<String> {
        vec![
            format!("env:{}", self.env),
            format!("route:{}", ctx.route),
            format!("provider:{}", ctx.provider),
            format!("model:{}", ctx.model_id),
        ]
    }

    /// The request context as a metadata record, with call-specific extras
    /// layered on top.
    pub fn metadata(&self, ctx: &RequestContext, extra: Map<String, Value>) -> Map<String, Value> {
        let mut metadata = match serde_json::to_value(ctx) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        metadata.extend(extra);
        metadata
    }

    /// Build trace options for one call, or `None` when tracing is off.
    pub fn trace_options(
        &self,
        ctx: &RequestContext,
        run_name: &str,
        extra: Map<String, Value>,
    ) -> Option<TraceOptions> {
        if !self.enabled {
            return None;
        }
        Some(TraceOptions {
            name: run_name.to_owned(),
            metadata: self.metadata(ctx, extra),
            tags: self.tags(ctx),
        })
    }

    /// Pick the method set: the model itself, or the model wrapped in
    /// [`TracedModel`] when tracing is on.
    pub fn wrap(&self, model: Arc<dyn LanguageModel>) -> Arc<dyn LanguageModel> {
        if self.enabled {
            Arc::new(TracedModel::new(model))
        } else {
            model
        }
    }
}

/// Merge trace options into provider options under the `tracing` key.
///
/// Absent trace options leave the base untouched.
pub fn merge_provider_options(
    mut base: ProviderOptions,
    trace: Option<&TraceOptions>,
) -> ProviderOptions {
    if let Some(trace) = trace
        && let Ok(value) = serde_json::to_value(trace)
    {
        base.insert(TRACING_OPTIONS_KEY.into(), value);
    }
    base
}

/// Remove and decode trace options from provider options.
fn take_trace_options(options: &mut ProviderOptions) -> Option<TraceOptions> {
    let value = options.remove(TRACING_OPTIONS_KEY)?;
    serde_json::from_value(value).ok()
}

fn call_span(kind: &'static str, trace: Option<&TraceOptions>) -> tracing::Span {
    match trace {
        Some(t) => {
            let metadata = Value::Object(t.metadata.clone());
            tracing::info_span!(
                "llm_call",
                call = kind,
                run_name = %t.name,
                tags = ?t.tags,
                metadata = %metadata,
            )
        }
        None => tracing::info_span!("llm_call", call = kind),
    }
}

/// A [`LanguageModel`] that runs every call inside a tracing span.
pub struct TracedModel {
    inner: Arc<dyn LanguageModel>,
}

impl TracedModel {
    pub fn new(inner: Arc<dyn LanguageModel>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LanguageModel for TracedModel {
    async fn stream_text(
        &self,
        mut request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        let trace = take_trace_options(&mut request.provider_options);
        let span = call_span("stream_text", trace.as_ref());

        let stream = self
            .inner
            .stream_text(request, cancel)
            .instrument(span.clone())
            .await
            .inspect_err(|e| span.in_scope(|| tracing::warn!(error = %e, "llm call failed")))?;

        Ok(Box::pin(stream.inspect(move |item| {
            let _entered = span.enter();
            match item {
                Ok(TextStreamPart::Finish { reason, usage }) => tracing::info!(
                    finish_reason = ?reason,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "llm call finished"
                ),
                Ok(TextStreamPart::ToolCall(call)) => {
                    tracing::debug!(tool = %call.name, call_id = %call.id, "tool call")
                }
                Ok(TextStreamPart::TextDelta(_)) => {}
                Err(e) => tracing::warn!(error = %e, "llm stream failed"),
            }
        })))
    }

    async fn stream_object(
        &self,
        mut request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<ObjectStream> {
        let trace = take_trace_options(&mut request.provider_options);
        let span = call_span("stream_object", trace.as_ref());

        let stream = self
            .inner
            .stream_object(request, cancel)
            .instrument(span.clone())
            .await
            .inspect_err(|e| span.in_scope(|| tracing::warn!(error = %e, "llm call failed")))?;

        Ok(Box::pin(stream.inspect(move |item| {
            let _entered = span.enter();
            match item {
                Ok(ObjectStreamPart::Finish { usage, .. }) => tracing::info!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "llm object stream finished"
                ),
                Ok(ObjectStreamPart::Partial(_)) => {}
                Err(e) => tracing::warn!(error = %e, "llm object stream failed"),
            }
        })))
    }

    async fn generate_text(
        &self,
        mut request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedText> {
        let trace = take_trace_options(&mut request.provider_options);
        let span = call_span("generate_text", trace.as_ref());

        let result = self
            .inner
            .generate_text(request, cancel)
            .instrument(span.clone())
            .await;
        span.in_scope(|| match &result {
            Ok(generated) => tracing::info!(
                input_tokens = generated.usage.input_tokens,
                output_tokens = generated.usage.output_tokens,
                "llm call finished"
            ),
            Err(e) => tracing::warn!(error = %e, "llm call failed"),
        });
        result
    }

    async fn generate_object(
        &self,
        mut request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedObject> {
        let trace = take_trace_options(&mut request.provider_options);
        let span = call_span("generate_object", trace.as_ref());

        let result = self
            .inner
            .generate_object(request, cancel)
            .instrument(span.clone())
            .await;
        span.in_scope(|| match &result {
            Ok(generated) => tracing::info!(
                input_tokens = generated.usage.input_tokens,
                output_tokens = generated.usage.output_tokens,
                "llm object call finished"
            ),
            Err(e) => tracing::warn!(error = %e, "llm call failed"),
        });
        result
    }
}
