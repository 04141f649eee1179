//! HTTP client for the OpenAI Chat Completions API.
//!
//! Every supported provider (Gemini through its OpenAI-compatible endpoint,
//! OpenAI, Groq and self-hosted compatible servers) speaks this protocol, so
//! one client covers them all.  The target endpoint and credentials travel
//! with each request in its [`ModelHandle`]; the client itself only owns the
//! connection pool.
//!
//! Streaming calls spawn a task that reads the SSE body and forwards parsed
//! parts over a bounded channel.  The task stops as soon as the cancellation
//! token fires or the receiver is dropped, which drops the HTTP response
//! and closes the upstream connection.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{AiError, Result};
use crate::llm::LanguageModel;
use crate::llm::partial_json::{parse_partial, strip_code_fence};
use crate::llm::provider::{ModelHandle, ProviderKind, ProviderOptions};
use crate::llm::streaming::{LineBuffer, OpenAiStreamAccumulator};
use crate::llm::types::{
    ContentPart, FinishReason, GeneratedObject, GeneratedText, Message, ModelRequest,
    ObjectRequest, ObjectStream, ObjectStreamPart, Role, TextStream, TextStreamPart, ToolCall,
    ToolDefinition, Usage,
};

/// Default total timeout for a single provider request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Capacity of the channel between the SSE reader task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Multi-provider LLM client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }

    // -- request building ----------------------------------------------------

    /// Build the JSON body for a text completion.
    fn build_chat_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.model_id,
            "messages": messages_to_openai(request.system.as_deref(), &request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
        }

        apply_stream_flags(&mut body, request.model.kind, stream);
        apply_provider_options(&mut body, request.model.kind, &request.provider_options);
        body
    }

    /// Build the JSON body for a structured-object completion.
    fn build_object_body(&self, request: &ObjectRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.model_id,
            "messages": messages_to_openai(request.system.as_deref(), &request.messages),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": false,
                }
            },
        });

        apply_stream_flags(&mut body, request.model.kind, stream);
        apply_provider_options(&mut body, request.model.kind, &request.provider_options);
        body
    }

    /// Send the HTTP request and check the status.
    async fn send(
        &self,
        model: &ModelHandle,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", model.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AiError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(
            url = %url,
            model = %model.model_id,
            provider = %model.provider_name,
            "sending LLM request"
        );

        let send = self.http.post(&url).headers(headers).json(body).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(AiError::Aborted),
            resp = send => resp?,
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AiError::LlmStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(resp)
    }

    /// Send a non-streaming request and parse the JSON body.
    async fn send_for_json(
        &self,
        model: &ModelHandle,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let resp = self.send(model, body, cancel).await?;
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(AiError::Aborted),
            text = resp.text() => text.map_err(|e| AiError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?,
        };

        serde_json::from_str(&text).map_err(|e| AiError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn stream_text(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        let body = self.build_chat_body(&request, true);
        let resp = self.send(&request.model, &body, &cancel).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if let Err(err) = pump_text(resp, &tx, &cancel).await {
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn stream_object(
        &self,
        request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<ObjectStream> {
        let body = self.build_object_body(&request, true);
        let resp = self.send(&request.model, &body, &cancel).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if let Err(err) = pump_object(resp, &tx, &cancel).await {
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn generate_text(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedText> {
        let body = self.build_chat_body(&request, false);
        let v = self.send_for_json(&request.model, &body, &cancel).await?;
        parse_openai_response(&v)
    }

    async fn generate_object(
        &self,
        request: ObjectRequest,
        cancel: CancellationToken,
    ) -> Result<GeneratedObject> {
        let body = self.build_object_body(&request, false);
        let v = self.send_for_json(&request.model, &body, &cancel).await?;
        let generated = parse_openai_response(&v)?;
        let object = parse_object_text(&generated.text)?;
        Ok(GeneratedObject {
            object,
            usage: generated.usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Stream pumps
// ---------------------------------------------------------------------------

type TextSender = mpsc::Sender<Result<TextStreamPart>>;
type ObjectSender = mpsc::Sender<Result<ObjectStreamPart>>;

/// Pulls text deltas out of an SSE response body.
struct SseReader {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    pending: VecDeque<String>,
    accumulator: OpenAiStreamAccumulator,
    ended: bool,
}

impl SseReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            bytes: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            lines: LineBuffer::new(),
            pending: VecDeque::new(),
            accumulator: OpenAiStreamAccumulator::new(),
            ended: false,
        }
    }

    /// Next text delta, or `None` once `[DONE]` or the end of the body is
    /// reached.
    async fn next_delta(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                if let Some(delta) = self.accumulator.feed_line(&line)? {
                    return Ok(Some(delta));
                }
                if self.accumulator.is_done() {
                    self.pending.clear();
                    self.ended = true;
                    return Ok(None);
                }
                continue;
            }
            if self.ended {
                return Ok(None);
            }

            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(AiError::Aborted),
                chunk = self.bytes.next() => chunk,
            };
            match chunk {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| AiError::LlmStreamError {
                        reason: format!("stream read error: {e}"),
                    })?;
                    self.pending.extend(self.lines.push(&chunk));
                }
                None => {
                    self.ended = true;
                    self.pending.extend(self.lines.finish());
                }
            }
        }
    }
}

async fn pump_text(
    resp: reqwest::Response,
    tx: &TextSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut reader = SseReader::new(resp);

    while let Some(delta) = reader.next_delta(cancel).await? {
        if tx.send(Ok(TextStreamPart::TextDelta(delta))).await.is_err() {
            // Consumer is gone; dropping the reader closes the connection.
            return Ok(());
        }
    }

    let summary = reader.accumulator.finish()?;
    for call in summary.tool_calls {
        if tx.send(Ok(TextStreamPart::ToolCall(call))).await.is_err() {
            return Ok(());
        }
    }
    let _ = tx
        .send(Ok(TextStreamPart::Finish {
            reason: summary.finish_reason,
            usage: summary.usage,
        }))
        .await;
    Ok(())
}

async fn pump_object(
    resp: reqwest::Response,
    tx: &ObjectSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut reader = SseReader::new(resp);
    let mut last: Option<Value> = None;

    while reader.next_delta(cancel).await?.is_some() {
        let Some(partial) = parse_partial(reader.accumulator.text()) else {
            continue;
        };
        if last.as_ref() == Some(&partial) {
            continue;
        }
        last = Some(partial.clone());
        if tx.send(Ok(ObjectStreamPart::Partial(partial))).await.is_err() {
            return Ok(());
        }
    }

    let summary = reader.accumulator.finish()?;
    let object = parse_object_text(&summary.text)?;
    let _ = tx
        .send(Ok(ObjectStreamPart::Finish {
            object,
            usage: summary.usage,
        }))
        .await;
    Ok(())
}

fn parse_object_text(text: &str) -> Result<Value> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| AiError::LlmParseFailed {
        reason: format!("model did not return a complete JSON object: {e}"),
    })
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Streams ask for usage in the final chunk.  Groq reports usage under
/// `x_groq` without being asked.
fn apply_stream_flags(body: &mut Value, kind: ProviderKind, stream: bool) {
    if !stream {
        return;
    }
    body["stream"] = json!(true);
    if kind != ProviderKind::Groq {
        body["stream_options"] = json!({ "include_usage": true });
    }
}

/// Translate provider options into request fields.
///
/// Only the `google` entry maps onto the wire (as Gemini's `extra_body`);
/// the `tracing` entry is consumed by the observability layer and anything
/// else is ignored.
fn apply_provider_options(body: &mut Value, kind: ProviderKind, options: &ProviderOptions) {
    if kind != ProviderKind::Google {
        return;
    }
    let Some(thinking) = options.get("google").map(|g| &g["thinkingConfig"]) else {
        return;
    };
    if thinking.is_null() {
        return;
    }
    body["extra_body"] = json!({
        "google": {
            "thinking_config": {
                "include_thoughts": thinking["includeThoughts"],
                "thinking_budget": thinking["thinkingBudget"],
            }
        }
    });
}

/// Convert messages (with an optional leading system prompt) into the
/// OpenAI wire format.
///
/// User turns with a single text part are sent as a plain string; anything
/// else becomes an array of `text` / `image_url` parts.
pub fn messages_to_openai(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system {
        wire_messages.push(json!({ "role": "system", "content": system }));
    }

    for msg in messages {
        match msg.role {
            Role::System => {
                wire_messages.push(json!({ "role": "system", "content": msg.text() }));
            }
            Role::User => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": user_content_to_openai(&msg.content),
                }));
            }
            Role::Assistant => {
                let mut m = json!({ "role": "assistant", "content": msg.text() });
                if !msg.tool_calls.is_empty() {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    m["tool_calls"] = json!(tool_calls);
                }
                wire_messages.push(m);
            }
            Role::Tool => {
                wire_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.text(),
                }));
            }
        }
    }

    wire_messages
}

fn user_content_to_openai(parts: &[ContentPart]) -> Value {
    // Empty content arrays are rejected upstream; an empty turn is "".
    match parts {
        [] => return json!(""),
        [ContentPart::Text { text }] => return json!(text),
        _ => {}
    }
    let wire: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { url } => json!({
                "type": "image_url",
                "image_url": { "url": url },
            }),
        })
        .collect();
    json!(wire)
}

/// Convert tool definitions into the OpenAI Chat Completions API format.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming Chat Completions response.
pub fn parse_openai_response(v: &Value) -> Result<GeneratedText> {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    if message.is_null() {
        return Err(AiError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let tool_calls = match message["tool_calls"].as_array() {
        Some(calls) => calls
            .iter()
            .enumerate()
            .map(|(index, tc)| {
                let func = &tc["function"];
                let name = func["name"].as_str().unwrap_or_default().to_owned();
                let args_str = func["arguments"].as_str().unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(args_str).map_err(|e| AiError::LlmParseFailed {
                        reason: format!("invalid JSON in tool call `{name}` arguments: {e}"),
                    })?;
                let id = tc["id"]
                    .as_str()
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("call_{index}"));

                Ok(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let finish_reason = choice["finish_reason"]
        .as_str()
        .map(FinishReason::from_openai)
        .unwrap_or_default();

    let usage = Usage {
        input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(GeneratedText {
        text: message["content"].as_str().unwrap_or_default().to_owned(),
        tool_calls,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(kind: ProviderKind) -> ModelHandle {
        ModelHandle {
            kind,
            provider_name: kind.as_str().into(),
            model_id: "m".into(),
            base_url: "http://localhost".into(),
            api_key: "k".into(),
        }
    }

    fn client() -> LlmClient {
        LlmClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap()
    }

    #[test]
    fn chat_body_includes_system_tools_and_usage_flag() {
        let request = ModelRequest::new(handle(ProviderKind::OpenAI), vec![Message::user("hi")])
            .with_system("be brief")
            .with_tools(vec![ToolDefinition {
                name: "generateTheme".into(),
                description: "d".into(),
                parameters: json!({"type": "object"}),
            }]);

        let body = client().build_chat_body(&request, true);
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["function"]["name"], "generateTheme");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("extra_body").is_none());
    }

    #[test]
    fn empty_turns_go_out_as_empty_strings() {
        let messages = vec![
            Message::user_parts(Vec::new()),
            Message::assistant(""),
            Message::user("make it teal"),
        ];
        let wire = messages_to_openai(Some("sys"), &messages);

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"], "");
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(wire[2]["content"], "");
        assert_eq!(wire[3]["content"], "make it teal");
        assert!(wire.iter().all(|m| m["content"] != json!([])));
    }

    #[test]
    fn groq_streams_without_stream_options() {
        let request = ModelRequest::new(handle(ProviderKind::Groq), vec![Message::user("hi")]);
        let body = client().build_chat_body(&request, true);
        assert_eq!(body["stream"], true);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn google_options_become_extra_body() {
        let mut options = ProviderOptions::new();
        options.insert(
            "google".into(),
            json!({"thinkingConfig": {"includeThoughts": false, "thinkingBudget": 128}}),
        );
        options.insert("tracing".into(), json!({"name": "generate-theme"}));

        let request = ModelRequest::new(handle(ProviderKind::Google), vec![Message::user("hi")])
            .with_provider_options(options);
        let body = client().build_chat_body(&request, false);

        let thinking = &body["extra_body"]["google"]["thinking_config"];
        assert_eq!(thinking["thinking_budget"], 128);
        assert_eq!(thinking["include_thoughts"], false);
        assert!(body.get("tracing").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn object_body_uses_json_schema_format() {
        let request = ObjectRequest {
            model: handle(ProviderKind::OpenAI),
            system: None,
            messages: vec![Message::user("teal")],
            schema_name: "theme".into(),
            schema: json!({"type": "object"}),
            provider_options: ProviderOptions::new(),
        };
        let body = client().build_object_body(&request, true);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "theme");
    }

    #[test]
    fn user_parts_become_array_with_images() {
        let msgs = vec![Message::user_parts(vec![
            ContentPart::text("make it teal"),
            ContentPart::image("data:image/png;base64,AAA"),
        ])];
        let wire = messages_to_openai(None, &msgs);
        assert_eq!(wire[0]["content"][0]["type"], "text");
        assert_eq!(wire[0]["content"][1]["type"], "image_url");
        assert_eq!(
            wire[0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAA"
        );
    }

    #[test]
    fn assistant_tool_calls_and_results() {
        let msgs = vec![
            Message::assistant_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "generateTheme".into(),
                    arguments: json!({"prompt": "teal"}),
                }],
            ),
            Message::tool_result("call_1", r#"{"light":{}}"#),
        ];
        let wire = messages_to_openai(None, &msgs);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            wire[0]["tool_calls"][0]["function"]["arguments"],
            r#"{"prompt":"teal"}"#
        );
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn parse_non_streaming_response() {
        let v = json!({
            "choices": [{
                "message": {"content": "Hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        });
        let generated = parse_openai_response(&v).unwrap();
        assert_eq!(generated.text, "Hello");
        assert_eq!(generated.finish_reason, FinishReason::Stop);
        assert_eq!(generated.usage.input_tokens, 5);
        assert!(generated.tool_calls.is_empty());
    }

    #[test]
    fn parse_missing_message_is_error() {
        let err = parse_openai_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, AiError::LlmParseFailed { .. }));
    }
}
