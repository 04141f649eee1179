//! AI runtime error types.
//!
//! All AI subsystems surface errors through [`AiError`].  The web layer maps
//! variants onto HTTP responses, so each one carries enough context to pick
//! the right status without string matching.

/// Unified error type for the AI runtime.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    // -- Configuration errors ------------------------------------------------
    /// `AI_PROVIDER` names a provider kind that is not supported.
    #[error("unsupported AI provider: {value}")]
    UnsupportedProvider { value: String },

    /// A required environment variable is absent or empty.
    #[error("missing required environment variable: {var}")]
    MissingEnv { var: &'static str },

    /// Configuration validation failed for another reason.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider answered with a non-success status.
    #[error("llm provider returned {status}: {body}")]
    LlmStatus { status: u16, body: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced by the LLM does not exist in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// A generated object did not satisfy its schema.
    #[error("schema validation failed: {reason}")]
    SchemaValidation { reason: String },

    // -- Cancellation --------------------------------------------------------
    /// The client went away or cancelled the request.
    #[error("request aborted by client")]
    Aborted,

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] tweakcn_store::StoreError),
}

/// Convenience alias used throughout the AI crate.
pub type Result<T> = std::result::Result<T, AiError>;

impl AiError {
    /// Whether this error comes from missing or invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProvider { .. } | Self::MissingEnv { .. } | Self::ConfigError { .. }
        )
    }

    /// Whether this error comes from talking to the LLM provider.  Such
    /// errors may carry upstream response text.
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::LlmRequestFailed { .. }
                | Self::LlmStatus { .. }
                | Self::LlmParseFailed { .. }
                | Self::LlmStreamError { .. }
        )
    }

    /// Whether this error means the request was cancelled.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::LlmRequestFailed {
                reason: format!("request timed out: {err}"),
            };
        }
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_classified() {
        assert!(AiError::MissingEnv { var: "GOOGLE_API_KEY" }.is_config());
        assert!(
            AiError::UnsupportedProvider {
                value: "anthropic".into()
            }
            .is_config()
        );
        assert!(!AiError::Aborted.is_config());
        assert!(AiError::Aborted.is_aborted());
    }

    #[test]
    fn provider_errors_are_classified() {
        assert!(
            AiError::LlmStatus {
                status: 500,
                body: "boom".into()
            }
            .is_provider()
        );
        assert!(
            !AiError::SchemaValidation {
                reason: "missing ring".into()
            }
            .is_provider()
        );
        assert!(!AiError::Aborted.is_provider());
    }

    #[test]
    fn missing_env_names_the_variable() {
        let err = AiError::MissingEnv { var: "AI_BASE_URL" };
        assert!(err.to_string().contains("AI_BASE_URL"));
    }
}
