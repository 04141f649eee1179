//! Process configuration, resolved once at startup.
//!
//! [`AppConfig::from_lookup`] takes an environment-style lookup so tests can
//! inject maps instead of mutating the process environment.

use std::path::PathBuf;
use std::time::Duration;

use tweakcn_ai::{AiConfig, AiError};

use crate::error::{ApiError, ApiResult};

/// Default number of requests allowed per rate-limit window.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 5;

/// Default rate-limit window.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Default free AI requests per calendar month.
pub const DEFAULT_FREE_REQUEST_LIMIT: u32 = 10;

/// Default location of the SQLite database.
pub const DEFAULT_DATABASE_PATH: &str = "data/tweakcn.db";

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: DEFAULT_RATE_LIMIT_REQUESTS,
            window: DEFAULT_RATE_LIMIT_WINDOW,
        }
    }
}

/// Everything the server reads from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ai: AiConfig,
    pub rate_limit: RateLimitConfig,
    pub free_request_limit: u32,
    pub database_path: PathBuf,
    /// Endpoint that resolves the caller's session from forwarded cookies.
    /// Without it every caller is anonymous.
    pub auth_session_url: Option<String>,
}

impl AppConfig {
    pub fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ai = AiConfig::from_lookup(&lookup).map_err(ApiError::from)?;

        let requests = parse_positive(
            "RATE_LIMIT_REQUESTS",
            get("RATE_LIMIT_REQUESTS"),
            DEFAULT_RATE_LIMIT_REQUESTS,
        )?;
        let window_secs = parse_positive(
            "RATE_LIMIT_WINDOW_SECS",
            get("RATE_LIMIT_WINDOW_SECS"),
            DEFAULT_RATE_LIMIT_WINDOW.as_secs() as u32,
        )?;
        let free_request_limit = match get("AI_FREE_REQUEST_LIMIT") {
            Some(v) => v.trim().parse::<u32>().map_err(|_| {
                config_error(format!("AI_FREE_REQUEST_LIMIT must be a number, got `{v}`"))
            })?,
            None => DEFAULT_FREE_REQUEST_LIMIT,
        };

        Ok(Self {
            ai,
            rate_limit: RateLimitConfig {
                requests,
                window: Duration::from_secs(u64::from(window_secs)),
            },
            free_request_limit,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            auth_session_url: get("AUTH_SESSION_URL").map(|u| u.trim().to_owned()),
        })
    }

    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_positive(var: &str, value: Option<String>, default: u32) -> ApiResult<u32> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(config_error(format!(
            "{var} must be a positive number, got `{value}`"
        ))),
    }
}

fn config_error(reason: String) -> ApiError {
    ApiError::from(AiError::ConfigError { reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_owned())
        }
    }

    #[test]
    fn defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_AI_MODEL", "gemini-2.5-flash"),
            ("GOOGLE_API_KEY", "k"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.free_request_limit, 10);
        assert_eq!(config.database_path, PathBuf::from("data/tweakcn.db"));
        assert!(config.auth_session_url.is_none());
    }

    #[test]
    fn overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_AI_MODEL", "gemini-2.5-flash"),
            ("GOOGLE_API_KEY", "k"),
            ("RATE_LIMIT_REQUESTS", "20"),
            ("RATE_LIMIT_WINDOW_SECS", "10"),
            ("AI_FREE_REQUEST_LIMIT", "0"),
            ("DATABASE_PATH", "/tmp/t.db"),
            ("AUTH_SESSION_URL", "http://auth/api/session"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit.requests, 20);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
        assert_eq!(config.free_request_limit, 0);
        assert_eq!(config.auth_session_url.as_deref(), Some("http://auth/api/session"));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let err = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_AI_MODEL", "gemini-2.5-flash"),
            ("GOOGLE_API_KEY", "k"),
            ("RATE_LIMIT_REQUESTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));

        let err = AppConfig::from_lookup(lookup(&[("AI_PROVIDER", "cohere")])).unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }
}
