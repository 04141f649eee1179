//! AI runtime for the tweakcn backend.
//!
//! This crate holds everything between an authorised request and the LLM
//! provider: resolving which provider/model to talk to, the streaming HTTP
//! client, the optional tracing layer, conversion of client messages into
//! provider messages, and the bounded tool-calling loop that drives theme
//! generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌────────────────┐
//! │  normalizer  │───>│ orchestrator │───>│  theme tool    │
//! │  (prompt)    │    │  (runtime)   │    │ (object stream)│
//! └──────────────┘    └──────┬───────┘    └───────┬────────┘
//!                            │                    │
//!                     ┌──────┴────────────────────┴──┐
//!                     │ LanguageModel (traced | raw) │
//!                     │   └─ LlmClient (SSE)         │
//!                     └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] -- Startup configuration and provider resolution.
//! - [`llm`] -- Wire types, the HTTP client and SSE parsing.
//! - [`observability`] -- Tracing spans around the four model entry points.
//! - [`prompt`] -- Client message and prompt-data normalisation.
//! - [`runtime`] -- The tool-augmented streaming loop.
//! - [`tools`] -- Tool registry and the theme-generation tool.
//! - [`events`] -- Events streamed to the caller.

pub mod config;
pub mod context;
pub mod enhance;
pub mod error;
pub mod events;
pub mod llm;
pub mod observability;
pub mod prompt;
pub mod prompts;
pub mod runtime;
pub mod smooth;
pub mod theme;
pub mod tools;
pub mod usage;

// Re-export the most commonly used types at the crate root.
pub use config::{AiConfig, AppEnv};
pub use context::RequestContext;
pub use enhance::EnhanceTurn;
pub use error::{AiError, Result};
pub use events::{DataEvent, EventWriter, StreamEvent, StreamEventKind, ThemeStatus};
pub use llm::{
    ContentPart, FinishReason, LanguageModel, LlmClient, Message, ModelHandle, ModelRequest,
    ObjectRequest, ProviderConfig, ProviderKind, ProviderOptions, Role, ToolCall, ToolDefinition,
    Usage,
};
pub use observability::{Observability, TraceOptions, TracedModel, merge_provider_options};
pub use prompt::{ChatMessage, PromptData, convert_messages, extract_correlation};
pub use runtime::{MAX_STEPS, ThemeTurn, TurnConfig, TurnOutcome};
pub use theme::{ThemeSchema, ThemeStyles};
pub use tools::{Tool, ToolContext, ToolId, ToolRegistry, generate_theme::ThemeTool};
pub use usage::record_usage;
