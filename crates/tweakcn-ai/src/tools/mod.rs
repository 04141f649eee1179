//! Tools the model can call during a turn.
//!
//! The set of tools is closed: each has a [`ToolId`], resolved from the
//! provider's tool name once when the call arrives.  Everything downstream
//! (events, result annotation) dispatches on the id, never on the string.

pub mod generate_theme;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::Result;
use crate::events::EventWriter;
use crate::llm::types::{Message, ToolDefinition};

/// Identity of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    GenerateTheme,
}

impl ToolId {
    /// The name advertised to the model.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GenerateTheme => "generateTheme",
        }
    }

    /// Message-level metadata attached to this tool's result on the wire.
    pub fn result_metadata(&self, output: &Value) -> Option<Value> {
        match self {
            Self::GenerateTheme => Some(json!({ "themeStyles": output })),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a tool gets to work with.
pub struct ToolContext<'a> {
    /// Id of the call being executed.
    pub tool_call_id: &'a str,
    /// The messages that prompted the call.  Neither the system prompt nor
    /// the assistant turn that made the call.
    pub messages: &'a [Message],
    /// Where to send progress events.
    pub writer: &'a EventWriter,
    /// Fires when the client goes away.
    pub cancel: &'a CancellationToken,
    /// The request the call belongs to.
    pub request: &'a RequestContext,
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;

    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool.  The returned value becomes the tool result fed back to
    /// the model on the next step.
    async fn execute(&self, arguments: Value, ctx: ToolContext<'_>) -> Result<Value>;
}

/// Tools available to a turn.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  A later registration with the same id replaces the
    /// earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.id() != tool.id());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Resolve a tool name from the model.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.id().name() == name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.id()))
            .finish()
    }
}
