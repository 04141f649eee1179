//! Provider resolution.
//!
//! Maps configuration to a concrete provider/model handle plus the
//! provider-specific options sent with every call.  Resolution is a pure
//! function of the lookup it is given, so resolving twice with unchanged
//! configuration yields equal results.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::{AiError, Result};

/// Provider options keyed by provider name (`google`, `tracing`, ...).
pub type ProviderOptions = Map<String, Value>;

/// Base URL of the Gemini OpenAI-compatible endpoint.
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
/// Base URL of the OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Base URL of the Groq OpenAI-compatible endpoint.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default display name for a self-hosted compatible provider.
const DEFAULT_COMPATIBLE_NAME: &str = "openai-compatible";

/// Thinking token budget requested from Google models.
const GOOGLE_THINKING_BUDGET: u32 = 128;

/// The closed set of supported provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Google,
    OpenAI,
    Groq,
    OpenAICompatible,
}

impl ProviderKind {
    /// Every supported kind, in the order they are documented.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Google,
        ProviderKind::OpenAI,
        ProviderKind::Groq,
        ProviderKind::OpenAICompatible,
    ];

    /// The configuration name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAI => "openai",
            Self::Groq => "groq",
            Self::OpenAICompatible => "openai-compatible",
        }
    }

    /// Environment variable holding the model id for this kind.
    pub fn model_env(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_AI_MODEL",
            Self::OpenAI => "OPENAI_AI_MODEL",
            Self::Groq => "GROQ_AI_MODEL",
            Self::OpenAICompatible => "OPENAI_COMPATIBLE_AI_MODEL",
        }
    }

    /// Environment variable holding the API key for this kind.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAICompatible => "AI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| AiError::UnsupportedProvider {
                value: s.to_owned(),
            })
    }
}

/// A concrete model on a concrete provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub kind: ProviderKind,
    /// Display name used in traces; differs from `kind` only for
    /// self-hosted compatible providers.
    pub provider_name: String,
    pub model_id: String,
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind)
            .field("provider_name", &self.provider_name)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

/// The resolved provider configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    model: ModelHandle,
}

impl ProviderConfig {
    /// Resolve the provider from an environment-style lookup.
    ///
    /// Empty values count as absent.  Fails with a configuration error when
    /// the provider name is outside the supported set or when the model id
    /// or credentials for the selected kind are missing.
    pub fn resolve<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kind = match get("AI_PROVIDER") {
            Some(name) => name.parse::<ProviderKind>()?,
            None => ProviderKind::Google,
        };

        let model_id = get(kind.model_env()).ok_or(AiError::MissingEnv {
            var: kind.model_env(),
        })?;

        let (base_url, provider_name) = match kind {
            ProviderKind::Google => (GOOGLE_BASE_URL.to_owned(), kind.as_str().to_owned()),
            ProviderKind::OpenAI => (OPENAI_BASE_URL.to_owned(), kind.as_str().to_owned()),
            ProviderKind::Groq => (GROQ_BASE_URL.to_owned(), kind.as_str().to_owned()),
            ProviderKind::OpenAICompatible => {
                let base_url = get("AI_BASE_URL").ok_or(AiError::MissingEnv {
                    var: "AI_BASE_URL",
                })?;
                let name = get("AI_PROVIDER_NAME")
                    .unwrap_or_else(|| DEFAULT_COMPATIBLE_NAME.to_owned());
                (base_url.trim_end_matches('/').to_owned(), name)
            }
        };

        let api_key = get(kind.api_key_env()).ok_or(AiError::MissingEnv {
            var: kind.api_key_env(),
        })?;

        Ok(Self {
            model: ModelHandle {
                kind,
                provider_name,
                model_id,
                base_url,
                api_key,
            },
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Build a configuration around an explicit model handle.
    pub fn from_model(model: ModelHandle) -> Self {
        Self { model }
    }

    pub fn kind(&self) -> ProviderKind {
        self.model.kind
    }

    pub fn provider_name(&self) -> &str {
        &self.model.provider_name
    }

    pub fn model_id(&self) -> &str {
        &self.model.model_id
    }

    /// The model handle to pass to a [`LanguageModel`](super::LanguageModel).
    pub fn model(&self) -> ModelHandle {
        self.model.clone()
    }

    /// Provider-specific options for this kind.  Only Google carries any.
    pub fn options(&self) -> ProviderOptions {
        let mut options = ProviderOptions::new();
        if self.model.kind == ProviderKind::Google {
            options.insert(
                "google".into(),
                json!({
                    "thinkingConfig": {
                        "includeThoughts": false,
                        "thinkingBudget": GOOGLE_THINKING_BUDGET,
                    }
                }),
            );
        }
        options
    }
}
