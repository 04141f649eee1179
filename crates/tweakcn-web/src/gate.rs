//! Access checks run before any model is called.
//!
//! Order for the theme route: identify the caller, rate-limit by address
//! (skipped in development), then check the subscription / free quota.  The
//! enhance route skips the address limit.  The first failing check
//! short-circuits the rest.

use std::sync::Arc;

use axum::http::HeaderMap;
use tweakcn_ai::AppEnv;
use tweakcn_store::SubscriptionService;

use crate::auth::SessionResolver;
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::RateLimiter;

/// Rate-limit key used when the caller's address is unknown.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// The three collaborators behind every AI route.
#[derive(Clone)]
pub struct AccessGate {
    sessions: Arc<dyn SessionResolver>,
    limiter: Arc<dyn RateLimiter>,
    subscriptions: Arc<dyn SubscriptionService>,
    env: AppEnv,
}

impl AccessGate {
    pub fn new(
        sessions: Arc<dyn SessionResolver>,
        limiter: Arc<dyn RateLimiter>,
        subscriptions: Arc<dyn SubscriptionService>,
        env: AppEnv,
    ) -> Self {
        Self {
            sessions,
            limiter,
            subscriptions,
            env,
        }
    }

    /// Admit a theme-generation request.  Returns the caller's user id.
    pub async fn admit_theme(&self, headers: &HeaderMap) -> ApiResult<Option<String>> {
        let user_id = self.sessions.resolve(headers).await;

        if !self.env.is_development() {
            let key = client_key(headers);
            let decision = self.limiter.limit(&key).await;
            if !decision.success {
                tracing::info!(key = %key, remaining = decision.remaining, "request throttled");
                return Err(ApiError::RateLimited(decision));
            }
        }

        self.check_subscription(user_id.as_deref()).await?;
        Ok(user_id)
    }

    /// Admit a prompt-enhancement request.  Returns the caller's user id.
    pub async fn admit_enhance(&self, headers: &HeaderMap) -> ApiResult<Option<String>> {
        let user_id = self.sessions.resolve(headers).await;
        self.check_subscription(user_id.as_deref()).await?;
        Ok(user_id)
    }

    async fn check_subscription(&self, user_id: Option<&str>) -> ApiResult<()> {
        let check = self.subscriptions.check(user_id).await?;
        if check.can_proceed {
            return Ok(());
        }
        Err(ApiError::SubscriptionRequired {
            message: check
                .error
                .unwrap_or_else(|| "A subscription is required.".into()),
            requests_remaining: check.requests_remaining,
        })
    }
}

/// The caller's address as reported by the proxy, or [`ANONYMOUS_KEY`].
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| ANONYMOUS_KEY.to_owned())
}
