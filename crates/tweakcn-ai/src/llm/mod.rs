//! LLM layer: provider resolution, wire types, the HTTP client and the
//! [`LanguageModel`] seam the rest of the crate calls through.

pub mod client;
pub mod partial_json;
pub mod provider;
pub mod streaming;
pub mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use client::LlmClient;
pub use provider::{ModelHandle, ProviderConfig, ProviderKind, ProviderOptions};
pub use types::{
    ContentPart, FinishReason, GeneratedObject, GeneratedText, Message, ModelRequest,
    ObjectRequest, ObjectStream, ObjectStreamPart, Role, TextStream, TextStreamPart, ToolCall,
    ToolDefinition, Usage,
};

use crate::error::Result;

/// The four model entry points.
///
/// Implemented by [`LlmClient`] for real providers and by
/// [`TracedModel`](crate::observability::TracedModel) as an instrumenting
/// wrapper.  Handlers receive one `Arc<dyn LanguageModel>` built at startup.
///
/// Every entry point honours `cancel`: once it fires, no further parts are
/// produced and in-flight HTTP requests are dropped.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream a single completion step: text deltas, then any tool calls,
    /// then exactly one `Finish`.
    async fn stream_text(&self, request: ModelRequest, cancel: CancellationToken)
    -> Result<TextStream>;

    /// Stream a structured object: partial values, then exactly one
    /// `Finish` carrying the complete object.
    async fn stream_object(
        &self,
        request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<ObjectStream>;

    /// Generate a completion without streaming.
    async fn generate_text(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedText>;

    /// Generate a structured object without streaming.
    async fn generate_object(
        &self,
        request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedObject>;
}
