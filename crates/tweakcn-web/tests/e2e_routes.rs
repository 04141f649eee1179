//! End-to-end tests for the AI routes.
//!
//! These tests spin up the **real** Axum router on an OS-assigned ephemeral
//! port, make actual HTTP requests via `reqwest`, and read the streamed
//! responses back.  The language model is an in-memory fake; everything
//! else (gate, rate limiter, usage store on SQLite, stream encoding) is the
//! production code.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tweakcn_ai::llm::types::{
    GeneratedObject, GeneratedText, ObjectStream, TextStream, TextStreamPart,
};
use tweakcn_ai::{
    AppEnv, EnhanceTurn, FinishReason, LanguageModel, ModelHandle, ModelRequest, ObjectRequest,
    Observability, ProviderConfig, ProviderKind, ThemeSchema, ThemeTool, ThemeTurn, ToolRegistry,
    Usage,
};
use tweakcn_store::{Database, StoreResult, UsageLedger, UsageRecord, UsageStore};
use tweakcn_web::auth::{AnonymousSessions, SessionResolver};
use tweakcn_web::rate_limit::FixedWindowLimiter;
use tweakcn_web::{AccessGate, AppState, router};

// ── fakes ────────────────────────────────────────────────────────────────────

/// Streams a fixed reply.  With `hang`, the stream stalls after the reply
/// until the call is cancelled.
struct FakeModel {
    reply: Vec<&'static str>,
    hang: bool,
    cancels: Mutex<Vec<CancellationToken>>,
}

impl FakeModel {
    fn replying(reply: Vec<&'static str>) -> Self {
        Self {
            reply,
            hang: false,
            cancels: Mutex::new(Vec::new()),
        }
    }

    fn hanging(reply: Vec<&'static str>) -> Self {
        Self {
            hang: true,
            ..Self::replying(reply)
        }
    }

    fn cancelled(&self) -> bool {
        self.cancels
            .lock()
            .unwrap()
            .iter()
            .any(CancellationToken::is_cancelled)
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn stream_text(
        &self,
        _request: ModelRequest,
        cancel: CancellationToken,
    ) -> tweakcn_ai::Result<TextStream> {
        self.cancels.lock().unwrap().push(cancel);
        let deltas = self
            .reply
            .iter()
            .map(|d| Ok(TextStreamPart::TextDelta((*d).to_owned())))
            .collect::<Vec<_>>();
        let head = futures::stream::iter(deltas);
        if self.hang {
            Ok(Box::pin(head.chain(futures::stream::pending())))
        } else {
            let finish = futures::stream::iter([Ok(TextStreamPart::Finish {
                reason: FinishReason::Stop,
                usage: Usage {
                    input_tokens: 21,
                    output_tokens: 8,
                },
            })]);
            Ok(Box::pin(head.chain(finish)))
        }
    }

    async fn stream_object(
        &self,
        _request: ObjectRequest,
        _cancel: CancellationToken,
    ) -> tweakcn_ai::Result<ObjectStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn generate_text(
        &self,
        _request: ModelRequest,
        _cancel: CancellationToken,
    ) -> tweakcn_ai::Result<GeneratedText> {
        unimplemented!("not used by routes")
    }

    async fn generate_object(
        &self,
        _request: ObjectRequest,
        _cancel: CancellationToken,
    ) -> tweakcn_ai::Result<GeneratedObject> {
        unimplemented!("not used by routes")
    }
}

struct SignedIn;

#[async_trait]
impl SessionResolver for SignedIn {
    async fn resolve(&self, _headers: &HeaderMap) -> Option<String> {
        Some("user_1".into())
    }
}

/// Records every usage row before storing it.
struct RecordingLedger {
    store: UsageStore,
    records: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageLedger for RecordingLedger {
    async fn record(&self, record: &UsageRecord) -> StoreResult<()> {
        self.records.lock().unwrap().push(record.clone());
        self.store.record(record).await
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

struct TestServer {
    base: String,
    model: Arc<FakeModel>,
    ledger: Arc<RecordingLedger>,
    store: UsageStore,
}

async fn start_test_server(
    model: FakeModel,
    sessions: Arc<dyn SessionResolver>,
    env: AppEnv,
) -> TestServer {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let store = UsageStore::new(db.clone(), 10);
    let ledger = Arc::new(RecordingLedger {
        store: store.clone(),
        records: Mutex::new(Vec::new()),
    });

    let provider = Arc::new(ProviderConfig::from_model(ModelHandle {
        kind: ProviderKind::Google,
        provider_name: "google".into(),
        model_id: "gemini-2.5-flash".into(),
        base_url: "http://127.0.0.1:9".into(),
        api_key: "k".into(),
    }));
    let observability = Observability::disabled();
    let model = Arc::new(model);
    let llm: Arc<dyn LanguageModel> = model.clone();

    let tool = ThemeTool::new(
        llm.clone(),
        provider.clone(),
        observability,
        Arc::new(ThemeSchema::new().unwrap()),
    );
    let theme = ThemeTurn::new(
        llm.clone(),
        provider.clone(),
        observability,
        ToolRegistry::new().with(Arc::new(tool)),
    )
    .with_ledger(ledger.clone());
    let enhance = EnhanceTurn::new(llm, provider.clone(), observability);

    let gate = AccessGate::new(
        sessions,
        Arc::new(FixedWindowLimiter::new(5, Duration::from_secs(60))),
        Arc::new(store.clone()),
        env,
    );

    let state = Arc::new(AppState {
        theme,
        enhance,
        gate,
        provider,
        db,
        shutdown: CancellationToken::new(),
    });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to port 0");
    let addr: SocketAddr = listener.local_addr().expect("get local addr");
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    // Small yield so the listener is ready.
    tokio::time::sleep(Duration::from_millis(10)).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", addr.port()),
        model,
        ledger,
        store,
    }
}

fn teal_request() -> Value {
    json!({
        "messages": [{
            "id": "m1",
            "role": "user",
            "content": "make it teal",
            "metadata": { "requestId": "r1", "conversationId": "c1" }
        }]
    })
}

/// Parse an SSE body into its `data:` payloads.
fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|l| l.trim().to_owned())
        .collect()
}

fn chunk_types(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| match serde_json::from_str::<Value>(l) {
            Ok(v) => v["type"].as_str().unwrap_or_default().to_owned(),
            Err(_) => l.clone(),
        })
        .collect()
}

// ── POST /api/generate-theme ─────────────────────────────────────────────────

#[tokio::test]
async fn theme_route_streams_to_finish_and_records_usage() {
    let srv = start_test_server(
        FakeModel::replying(vec!["Making", " it", " teal."]),
        Arc::new(SignedIn),
        AppEnv::Production,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/generate-theme", srv.base))
        .header("x-forwarded-for", "10.0.0.1")
        .json(&teal_request())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-vercel-ai-ui-message-stream"], "v1");
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = resp.text().await.unwrap();
    let lines = data_lines(&body);
    assert_eq!(
        chunk_types(&lines),
        vec![
            "start",
            "text-start",
            "text-delta",
            "text-delta",
            "text-delta",
            "text-end",
            "finish",
            "[DONE]"
        ]
    );

    let deltas: Vec<String> = lines
        .iter()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter(|v| v["type"] == "text-delta")
        .map(|v| v["delta"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(deltas.concat(), "Making it teal.");

    let records = srv.ledger.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model_id, "gemini-2.5-flash");
    assert_eq!(records[0].prompt_tokens, 21);
    assert_eq!(records[0].completion_tokens, 8);
    assert_eq!(records[0].user_id.as_deref(), Some("user_1"));

    let summary = srv.store.summary_at("user_1", Utc::now()).await.unwrap();
    assert_eq!(summary.requests, 1);
}

#[tokio::test]
async fn sixth_request_is_throttled() {
    let srv = start_test_server(
        FakeModel::replying(vec!["ok"]),
        Arc::new(SignedIn),
        AppEnv::Production,
    )
    .await;
    let client = reqwest::Client::new();

    let mut last = None;
    for _ in 0..6 {
        let resp = client
            .post(format!("{}/api/generate-theme", srv.base))
            .header("x-forwarded-for", "10.0.0.2")
            .json(&teal_request())
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let _ = resp.text().await;
        last = Some((status, headers));
    }

    let (status, headers) = last.unwrap();
    assert_eq!(status, 429);
    assert_eq!(headers["x-ratelimit-limit"], "5");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    let reset: i64 = headers["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
    assert!(reset > Utc::now().timestamp_millis() - 1_000);

    // Five admitted requests, five usage rows; the sixth never reached the model.
    assert_eq!(srv.ledger.records.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn aborting_mid_stream_records_no_usage() {
    let srv = start_test_server(
        FakeModel::hanging(vec!["Thinking", " about"]),
        Arc::new(SignedIn),
        AppEnv::Production,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/generate-theme", srv.base))
        .json(&teal_request())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut body = resp.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("start"));
    drop(body);

    let mut cancelled = false;
    for _ in 0..250 {
        if srv.model.cancelled() {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cancelled, "turn was not cancelled after the client went away");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(srv.ledger.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn anonymous_callers_need_to_sign_in() {
    let srv = start_test_server(
        FakeModel::replying(vec!["never"]),
        Arc::new(AnonymousSessions),
        AppEnv::Production,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/generate-theme", srv.base))
        .json(&teal_request())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "SUBSCRIPTION_REQUIRED");
    assert_eq!(body["data"]["requestsRemaining"], 0);
    assert!(srv.model.cancels.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let srv = start_test_server(
        FakeModel::replying(vec!["never"]),
        Arc::new(SignedIn),
        AppEnv::Development,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/generate-theme", srv.base))
        .header("content-type", "application/json")
        .body("{\"messages\": 7}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ── POST /api/enhance-prompt ─────────────────────────────────────────────────

#[tokio::test]
async fn enhance_route_streams_words() {
    let srv = start_test_server(
        FakeModel::replying(vec!["A deep teal pri", "mary with sand accents"]),
        Arc::new(SignedIn),
        AppEnv::Production,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/enhance-prompt", srv.base))
        .json(&json!({
            "prompt": "teal",
            "promptData": { "content": "teal", "mentions": [], "images": [] },
            "requestId": "r9"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let lines = data_lines(&resp.text().await.unwrap());
    let deltas: Vec<String> = lines
        .iter()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter(|v| v["type"] == "text-delta")
        .map(|v| v["delta"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(
        deltas,
        vec!["A ", "deep ", "teal ", "primary ", "with ", "sand ", "accents"]
    );
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

    // Enhancement does not count against the ledger.
    assert!(srv.ledger.records.lock().unwrap().is_empty());
}

// ── GET /api/health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_database_and_model() {
    let srv = start_test_server(
        FakeModel::replying(vec![]),
        Arc::new(AnonymousSessions),
        AppEnv::Production,
    )
    .await;

    let body: Value = reqwest::get(format!("{}/api/health", srv.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], true);
    assert_eq!(body["provider"], "google");
    assert_eq!(body["modelId"], "gemini-2.5-flash");
}
