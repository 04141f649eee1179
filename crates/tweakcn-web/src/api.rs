//! Route handlers.
//!
//! The AI routes gate the request, parse the body, start the turn on its own
//! task and answer with the turn's event stream.  The request body is parsed
//! after the gate so throttled callers cost nothing.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use tweakcn_ai::enhance::ENHANCE_ROUTE;
use tweakcn_ai::runtime::THEME_ROUTE;
use tweakcn_ai::{
    ChatMessage, EventWriter, PromptData, RequestContext, convert_messages, extract_correlation,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::stream;

// ---------------------------------------------------------------------------
// POST /api/generate-theme
// ---------------------------------------------------------------------------

/// Request body of the theme route.
#[derive(Debug, Deserialize)]
pub struct GenerateThemeRequest {
    pub messages: Vec<ChatMessage>,
}

pub async fn generate_theme(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let user_id = state.gate.admit_theme(&headers).await?;

    let request: GenerateThemeRequest = parse_body(&body)?;
    let (request_id, conversation_id) = extract_correlation(&request.messages);
    let messages = convert_messages(&request.messages);

    let ctx = RequestContext::new(THEME_ROUTE, &state.provider)
        .with_correlation(request_id, conversation_id)
        .with_user(user_id);

    let cancel = state.request_token();
    let (writer, rx) = EventWriter::channel(&ctx, cancel.clone());

    let span = tracing::info_span!(
        "generate_theme",
        request_id = ctx.request_id.as_deref().unwrap_or("-"),
        conversation_id = ctx.conversation_id.as_deref().unwrap_or("-"),
    );
    let turn = state.theme.clone();
    let message_count = request.messages.len();
    tokio::spawn(
        async move {
            turn.run(&ctx, messages, message_count, writer).await;
        }
        .instrument(span),
    );

    stream::respond(rx, cancel).await
}

// ---------------------------------------------------------------------------
// POST /api/enhance-prompt
// ---------------------------------------------------------------------------

/// Request body of the enhancement route.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancePromptRequest {
    /// Plain prompt text, used when no structured prompt is sent.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_data: Option<PromptData>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl EnhancePromptRequest {
    fn into_prompt(self) -> ApiResult<PromptData> {
        match (self.prompt_data, self.prompt) {
            (Some(data), _) => Ok(data),
            (None, Some(text)) if !text.trim().is_empty() => Ok(PromptData {
                content: text,
                ..Default::default()
            }),
            _ => Err(ApiError::BadRequest(
                "promptData or prompt is required".into(),
            )),
        }
    }
}

pub async fn enhance_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let user_id = state.gate.admit_enhance(&headers).await?;

    let request: EnhancePromptRequest = parse_body(&body)?;
    let ctx = RequestContext::new(ENHANCE_ROUTE, &state.provider)
        .with_correlation(request.request_id.clone(), request.conversation_id.clone())
        .with_user(user_id);
    let prompt = request.into_prompt()?;

    let cancel = state.request_token();
    let (writer, rx) = EventWriter::channel(&ctx, cancel.clone());

    let span = tracing::info_span!(
        "enhance_prompt",
        request_id = ctx.request_id.as_deref().unwrap_or("-"),
    );
    let turn = state.enhance.clone();
    tokio::spawn(
        async move {
            turn.run(&ctx, &prompt, writer).await;
        }
        .instrument(span),
    );

    stream::respond(rx, cancel).await
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub provider: String,
    pub model_id: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            false
        }
    };

    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        provider: state.provider.provider_name().to_owned(),
        model_id: state.provider.model_id().to_owned(),
    })
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhance_request_prefers_prompt_data() {
        let req: EnhancePromptRequest = serde_json::from_str(
            r#"{"prompt":"ignored","promptData":{"content":"warm","mentions":[],"images":[]},"requestId":"r1"}"#,
        )
        .unwrap();
        assert_eq!(req.request_id.as_deref(), Some("r1"));
        assert_eq!(req.into_prompt().unwrap().content, "warm");
    }

    #[test]
    fn enhance_request_falls_back_to_prompt() {
        let req: EnhancePromptRequest = serde_json::from_str(r#"{"prompt":"teal"}"#).unwrap();
        assert_eq!(req.into_prompt().unwrap().content, "teal");

        let req: EnhancePromptRequest = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(req.into_prompt(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = parse_body::<GenerateThemeRequest>(b"{not json").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
