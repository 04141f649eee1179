//! HTTP error type.
//!
//! [`ApiError`] is the single place where failures become statuses and
//! user-visible messages.  Provider and storage details are logged but never
//! sent to the client.

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tweakcn_ai::AiError;
use tweakcn_store::StoreError;

use crate::rate_limit::RateLimitDecision;

/// Alias for `Result<T, ApiError>`.
pub type ApiResult<T> = Result<T, ApiError>;

/// Non-standard "client closed request" status.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Body of a throttled response.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Body of an aborted response.
pub const ABORTED_MESSAGE: &str = "Request aborted by user";

/// Message for failures whose details stay in the logs.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors a route handler can return.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server is misconfigured; the route cannot work at all.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Too many requests from one address.
    #[error("rate limit exceeded")]
    RateLimited(RateLimitDecision),

    /// The caller needs a subscription (or to sign in) to continue.
    #[error("subscription required: {message}")]
    SubscriptionRequired {
        message: String,
        requests_remaining: Option<u32>,
    },

    /// The request body could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The client went away before the response started.
    #[error("request aborted by client")]
    ClientAborted,

    /// Anything else.  The message is for the logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::SubscriptionRequired { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ClientAborted => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        if err.is_aborted() {
            Self::ClientAborted
        } else if err.is_config() {
            Self::Configuration(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            Self::RateLimited(decision) => {
                tracing::warn!(
                    limit = decision.limit,
                    reset = decision.reset,
                    "rate limit exceeded"
                );
                let mut resp = (status, RATE_LIMIT_MESSAGE).into_response();
                let headers = resp.headers_mut();
                headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
                headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset));
                resp
            }
            Self::ClientAborted => {
                tracing::info!(status = STATUS_CLIENT_CLOSED_REQUEST, "request aborted by client");
                (status, ABORTED_MESSAGE).into_response()
            }
            Self::SubscriptionRequired {
                message,
                requests_remaining,
            } => {
                tracing::info!(?requests_remaining, "subscription required");
                let body = json!({
                    "error": message,
                    "code": "SUBSCRIPTION_REQUIRED",
                    "data": { "requestsRemaining": requests_remaining },
                });
                (status, Json(body)).into_response()
            }
            Self::BadRequest(message) => {
                let body = json!({ "error": message, "code": "BAD_REQUEST" });
                (status, Json(body)).into_response()
            }
            Self::Configuration(reason) => {
                tracing::error!(reason = %reason, "configuration error");
                let body = json!({
                    "error": "AI is not configured on this server.",
                    "code": "CONFIGURATION_ERROR",
                });
                (status, Json(body)).into_response()
            }
            Self::Internal(reason) => {
                tracing::error!(reason = %reason, "request failed");
                let body = json!({ "error": GENERIC_FAILURE_MESSAGE, "code": "INTERNAL_ERROR" });
                (status, Json(body)).into_response()
            }
        }
    }
}
