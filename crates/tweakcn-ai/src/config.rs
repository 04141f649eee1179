//! Startup configuration for the AI runtime.
//!
//! Everything environment-driven is read once into [`AiConfig`]; handlers
//! never consult the environment themselves.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AiError, Result};
use crate::llm::client::DEFAULT_REQUEST_TIMEOUT;
use crate::llm::provider::ProviderConfig;

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    #[default]
    Production,
    Test,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Self::Development
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(AiError::ConfigError {
                reason: format!("APP_ENV must be development, production or test, got `{other}`"),
            }),
        }
    }
}

/// Resolved AI configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub provider: ProviderConfig,
    /// Whether LLM calls are wrapped in tracing spans (`AI_TRACING`).
    pub tracing: bool,
    pub env: AppEnv,
    /// Total timeout for a single provider request.
    pub request_timeout: Duration,
}

impl AiConfig {
    /// Resolve from an environment-style lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = ProviderConfig::resolve(&lookup)?;

        let tracing = match get("AI_TRACING") {
            Some(v) => parse_bool("AI_TRACING", &v)?,
            None => false,
        };

        let env = match get("APP_ENV") {
            Some(v) => v.parse()?,
            None => AppEnv::default(),
        };

        let request_timeout = match get("AI_REQUEST_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = v.trim().parse().map_err(|_| AiError::ConfigError {
                    reason: format!("AI_REQUEST_TIMEOUT_SECS must be a number of seconds, got `{v}`"),
                })?;
                if secs == 0 {
                    return Err(AiError::ConfigError {
                        reason: "AI_REQUEST_TIMEOUT_SECS must be greater than zero".into(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            provider,
            tracing,
            env,
            request_timeout,
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Parse a boolean flag the way shell users write them.
pub fn parse_bool(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AiError::ConfigError {
            reason: format!("{var} must be a boolean, got `{other}`"),
        }),
    }
}
