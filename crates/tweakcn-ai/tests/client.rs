//! HTTP-level tests for the chat-completions client against a mock server.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tweakcn_ai::llm::types::{ObjectStreamPart, TextStreamPart};
use tweakcn_ai::{
    AiError, FinishReason, LanguageModel, LlmClient, Message, ModelHandle, ModelRequest,
    ObjectRequest, ProviderConfig, ProviderKind,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn handle(server: &MockServer, kind: ProviderKind) -> ModelHandle {
    ModelHandle {
        kind,
        provider_name: kind.as_str().into(),
        model_id: "test-model".into(),
        base_url: server.uri(),
        api_key: "sk-test".into(),
    }
}

fn client() -> LlmClient {
    LlmClient::new(Duration::from_secs(5)).unwrap()
}

fn sse(chunks: &[Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(chunks: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse(chunks))
}

fn text_chunk(text: &str) -> Value {
    json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
}

#[tokio::test]
async fn stream_text_yields_deltas_tool_calls_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "stream_options": { "include_usage": true }
        })))
        .respond_with(sse_response(&[
            text_chunk("Hello"),
            text_chunk(", world"),
            json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [{
                "index": 0, "id": "call_a", "type": "function",
                "function": { "name": "generateTheme", "arguments": "{\"mo" }
            }]}}]}),
            json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [{
                "index": 0, "function": { "arguments": "od\":\"calm\"}" }
            }]}, "finish_reason": "tool_calls" }]}),
            json!({ "choices": [], "usage": { "prompt_tokens": 11, "completion_tokens": 4 } }),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let request = ModelRequest::new(
        ProviderConfig::from_model(handle(&server, ProviderKind::OpenAI)).model(),
        vec![Message::user("hi")],
    );
    let mut stream = client()
        .stream_text(request, CancellationToken::new())
        .await
        .unwrap();

    let mut parts = Vec::new();
    while let Some(part) = stream.next().await {
        parts.push(part.unwrap());
    }

    assert_eq!(parts.len(), 4);
    assert!(matches!(&parts[0], TextStreamPart::TextDelta(t) if t == "Hello"));
    assert!(matches!(&parts[1], TextStreamPart::TextDelta(t) if t == ", world"));
    match &parts[2] {
        TextStreamPart::ToolCall(call) => {
            assert_eq!(call.id, "call_a");
            assert_eq!(call.name, "generateTheme");
            assert_eq!(call.arguments, json!({ "mood": "calm" }));
        }
        other => panic!("expected tool call, got {other:?}"),
    }
    match &parts[3] {
        TextStreamPart::Finish { reason, usage } => {
            assert_eq!(*reason, FinishReason::ToolCalls);
            assert_eq!(usage.input_tokens, 11);
            assert_eq!(usage.output_tokens, 4);
        }
        other => panic!("expected finish, got {other:?}"),
    }
}

#[tokio::test]
async fn google_requests_carry_thinking_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "extra_body": { "google": { "thinking_config": {
                "include_thoughts": false,
                "thinking_budget": 128
            }}}
        })))
        .respond_with(sse_response(&[text_chunk("ok")]))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ProviderConfig::from_model(handle(&server, ProviderKind::Google));
    let request = ModelRequest::new(provider.model(), vec![Message::user("hi")])
        .with_provider_options(provider.options());
    let mut stream = client()
        .stream_text(request, CancellationToken::new())
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, TextStreamPart::TextDelta(t) if t == "ok"));
}

#[tokio::test]
async fn stream_object_emits_growing_partials_then_final() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "theme_styles", "strict": false }
            }
        })))
        .respond_with(sse_response(&[
            text_chunk("{\"light\": {\"primary\": \"#0d"),
            text_chunk("9488\"}, \"dark\": {\"prim"),
            text_chunk("ary\": \"#2dd4bf\"}}"),
            json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
                    "usage": { "prompt_tokens": 20, "completion_tokens": 30 } }),
        ]))
        .mount(&server)
        .await;

    let request = ObjectRequest {
        model: handle(&server, ProviderKind::OpenAI),
        system: Some("be a theme".into()),
        messages: vec![Message::user("teal")],
        schema_name: "theme_styles".into(),
        schema: json!({ "type": "object" }),
        provider_options: Default::default(),
    };
    let mut stream = client()
        .stream_object(request, CancellationToken::new())
        .await
        .unwrap();

    let mut partials = Vec::new();
    let mut last = None;
    while let Some(part) = stream.next().await {
        match part.unwrap() {
            ObjectStreamPart::Partial(p) => partials.push(p),
            ObjectStreamPart::Finish { object, usage } => last = Some((object, usage)),
        }
    }

    assert!(!partials.is_empty());
    assert_eq!(partials[0]["light"]["primary"], "#0d");
    for pair in partials.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
    let (object, usage) = last.unwrap();
    assert_eq!(
        object,
        json!({ "light": { "primary": "#0d9488" }, "dark": { "primary": "#2dd4bf" } })
    );
    assert_eq!(usage.output_tokens, 30);
}

#[tokio::test]
async fn groq_streams_omit_stream_options_and_read_x_groq_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            text_chunk("hey"),
            json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
                    "x_groq": { "usage": { "prompt_tokens": 3, "completion_tokens": 1 } } }),
        ]))
        .mount(&server)
        .await;

    let request = ModelRequest::new(
        handle(&server, ProviderKind::Groq),
        vec![Message::user("hi")],
    );
    let mut stream = client()
        .stream_text(request, CancellationToken::new())
        .await
        .unwrap();
    let mut usage = None;
    while let Some(part) = stream.next().await {
        if let TextStreamPart::Finish { usage: u, .. } = part.unwrap() {
            usage = Some(u);
        }
    }
    assert_eq!(usage.unwrap().input_tokens, 3);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["stream"], true);
    assert!(body.get("stream_options").is_none());
}

#[tokio::test]
async fn error_status_surfaces_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let request = ModelRequest::new(
        handle(&server, ProviderKind::OpenAI),
        vec![Message::user("hi")],
    );
    let err = client()
        .stream_text(request, CancellationToken::new())
        .await
        .err()
        .unwrap();
    match err {
        AiError::LlmStatus { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn generate_text_parses_non_streaming_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "A teal theme." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 4 }
        })))
        .mount(&server)
        .await;

    let request = ModelRequest::new(
        handle(&server, ProviderKind::OpenAICompatible),
        vec![Message::user("hi")],
    );
    let generated = client()
        .generate_text(request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(generated.text, "A teal theme.");
    assert_eq!(generated.finish_reason, FinishReason::Stop);
    assert_eq!(generated.usage.output_tokens, 4);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn cancelled_before_send_is_aborted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&[text_chunk("never")]).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = ModelRequest::new(
        handle(&server, ProviderKind::OpenAI),
        vec![Message::user("hi")],
    );
    let err = client().stream_text(request, cancel).await.err().unwrap();
    assert!(err.is_aborted());
}
