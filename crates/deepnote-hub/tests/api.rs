//! Integration tests for the HTTP surface.
//!
//! The server runs for real on a random port. LINE is replaced by a small axum
//! app that records every call, the LLM by a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use deepnote_core::NoteAssistant;
use deepnote_core::config::DeepNoteConfig;
use deepnote_core::document::InMemoryDocumentStore;
use deepnote_core::error::{DeepNoteError, Result};
use deepnote_core::message::{LlmResponse, TokenUsage};
use deepnote_core::provider::{ChatRequest, LlmProvider};
use deepnote_hub::api::{ApiState, LinePush, build_router};
use deepnote_hub::channels::{LineChannel, LineConfig};
use serde_json::Value;

const QUESTIONS: &str = r#"{"questions": [
    {"type": "Cause", "q": "Why did you run out?"},
    {"type": "Action", "q": "When will you go shopping?"},
    {"type": "Values", "q": "Why does it matter?"}
]}"#;

struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<LlmResponse> {
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DeepNoteError::Llm("script exhausted".into()))?;
        Ok(LlmResponse {
            content: Some(content),
            model: "scripted-1".into(),
            usage: TokenUsage::default(),
            finish_reason: "stop".into(),
        })
    }
}

// ─── Fake LINE API ─────────────────────────────────────────

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

async fn record_reply(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
    calls.lock().unwrap().push(("reply".into(), body));
    Json(serde_json::json!({}))
}

async fn record_push(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
    calls.lock().unwrap().push(("push".into(), body));
    Json(serde_json::json!({}))
}

async fn content(Path(_id): Path<String>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G'])
}

async fn start_fake_line() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v2/bot/message/reply", post(record_reply))
        .route("/v2/bot/message/push", post(record_push))
        .route("/v2/bot/message/{id}/content", get(content))
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), calls)
}

// ─── Server under test ─────────────────────────────────────

struct TestServer {
    base: String,
    store: Arc<InMemoryDocumentStore>,
    line_calls: Calls,
}

async fn start_test_server(llm_replies: &[&str], with_line: bool) -> TestServer {
    let config = DeepNoteConfig::default();
    let store = Arc::new(InMemoryDocumentStore::new());
    let assistant =
        Arc::new(NoteAssistant::new(store.clone(), ScriptedProvider::new(llm_replies), &config).unwrap());

    let (line_base, line_calls) = start_fake_line().await;
    let mut state = ApiState::new(assistant, &config);
    if with_line {
        state.line = Some(LinePush {
            channel: LineChannel::new(LineConfig {
                channel_access_token: "token".into(),
                api_base: line_base.clone(),
                data_api_base: line_base,
            }),
            user_id: "U1".into(),
            reminder_message: "Time to write!".into(),
        });
    }
    let router = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        store,
        line_calls,
    }
}

/// Helper to GET a URL and return (status, body_string).
async fn get_path(base: &str, path: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

/// Helper to POST JSON and return (status, body_string).
async fn post_json(base: &str, path: &str, json: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .header("content-type", "application/json")
        .body(json.to_string())
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

async fn send(base: &str, message: &str, session_id: &str) -> Value {
    let body = serde_json::json!({"message": message, "session_id": session_id}).to_string();
    let (status, body) = post_json(base, "/api/message", &body).await;
    assert_eq!(status, 200);
    serde_json::from_str(&body).unwrap()
}

// ─── Health ────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_test_server(&[], false).await;
    let (status, body) = get_path(&server.base, "/health").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}

// ─── REST API ──────────────────────────────────────────────

#[tokio::test]
async fn test_message_without_session_id_gets_one() {
    let server = start_test_server(&[], false).await;
    let (status, body) = post_json(&server.base, "/api/message", r#"{"message": "Buy milk"}"#).await;
    assert_eq!(status, 200);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["session_state"], "waiting_deep_dive");
    assert!(json["message"].as_str().unwrap().starts_with("Saved!"));
    assert!(json.get("questions").is_none());

    let session_id = json["session_id"].as_str().unwrap();
    assert!(!session_id.is_empty());

    let (status, body) = get_path(&server.base, &format!("/api/session/{}", session_id)).await;
    assert_eq!(status, 200);
    let status_json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status_json["session_state"], "waiting_deep_dive");
    assert_eq!(status_json["qa_pairs"], serde_json::json!([]));
    assert!(status_json["last_activity"].is_string());
}

#[tokio::test]
async fn test_deep_dive_over_http() {
    let server = start_test_server(&[QUESTIONS], false).await;
    let base = &server.base;

    send(base, "Buy milk", "web-1").await;

    let json = send(base, "yes", "web-1").await;
    assert_eq!(json["session_state"], "waiting_choice");
    let questions = json["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 3);
    assert_eq!(questions[0]["type"], "Cause");
    assert_eq!(questions[0]["q"], "Why did you run out?");

    let json = send(base, "1", "web-1").await;
    assert_eq!(json["session_state"], "waiting_answer");

    let json = send(base, "Because it's empty", "web-1").await;
    assert_eq!(json["session_state"], "waiting_continue");

    let (_, body) = get_path(base, "/api/session/web-1").await;
    let status_json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status_json["qa_pairs"][0]["answer"], "Because it's empty");

    let notes: Vec<String> = server
        .store
        .paths()
        .into_iter()
        .filter_map(|p| server.store.read(&p))
        .collect();
    assert!(notes.iter().any(|n| n.contains("  - Why did you run out?\n    - Because it's empty")));
}

#[tokio::test]
async fn test_failed_generation_reports_error() {
    let server = start_test_server(&[], false).await;
    send(&server.base, "Buy milk", "web-2").await;

    let json = send(&server.base, "yes", "web-2").await;
    assert_eq!(json["success"], false);
    assert_eq!(json["session_state"], "waiting_deep_dive");
    assert!(json["error"].as_str().unwrap().contains("script exhausted"));
}

#[tokio::test]
async fn test_malformed_message_gets_error_reply() {
    let server = start_test_server(&[], false).await;

    for (body, expected) in [("{not json", 400), (r#"{"text": "Buy milk"}"#, 422)] {
        let (status, body) = post_json(&server.base, "/api/message", body).await;
        assert_eq!(status, expected);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["session_state"], "error");
        assert!(json["error"].as_str().unwrap().starts_with("Transport error"));
    }
    assert!(server.store.paths().is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let server = start_test_server(&[], false).await;
    let (status, body) = get_path(&server.base, "/api/session/nope").await;
    assert_eq!(status, 404);
    assert!(body.contains("Session not found"));
}

// ─── LINE webhook ──────────────────────────────────────────

#[tokio::test]
async fn test_callback_text_replies_on_line() {
    let server = start_test_server(&[], true).await;
    let event = r#"{"events": [{"type": "message", "replyToken": "r1",
        "source": {"userId": "U1"},
        "message": {"id": "m1", "type": "text", "text": "Buy milk"}}]}"#;

    let (status, body) = post_json(&server.base, "/callback", event).await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");

    let calls = server.line_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (kind, body) = &calls[0];
    assert_eq!(kind, "reply");
    assert_eq!(body["replyToken"], "r1");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0]["text"].as_str().unwrap().starts_with("Saved!"));

    let (status, body) = get_path(&server.base, "/api/session/line").await;
    assert_eq!(status, 200);
    assert!(body.contains("waiting_deep_dive"));
}

#[tokio::test]
async fn test_callback_ignores_malformed_and_other_events() {
    let server = start_test_server(&[], true).await;

    let (status, body) = post_json(&server.base, "/callback", "not json").await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");

    let follow = r#"{"events": [{"type": "follow", "replyToken": "r1"}]}"#;
    let (status, _) = post_json(&server.base, "/callback", follow).await;
    assert_eq!(status, 200);

    assert!(server.line_calls.lock().unwrap().is_empty());
    assert!(server.store.paths().is_empty());
}

#[tokio::test]
async fn test_callback_image_is_archived() {
    let server = start_test_server(&[], true).await;
    let event = r#"{"events": [{"type": "message", "replyToken": "r2",
        "message": {"id": "m2", "type": "image"}}]}"#;

    let (status, _) = post_json(&server.base, "/callback", event).await;
    assert_eq!(status, 200);

    let paths = server.store.paths();
    let asset = paths
        .iter()
        .find(|p| p.contains("/assets/") && p.ends_with(".png"))
        .expect("image uploaded");
    assert!(asset.starts_with("seeds/"));

    let calls = server.line_calls.lock().unwrap().clone();
    assert_eq!(calls[0].1["messages"][0]["text"].as_str().unwrap().lines().next(), Some("Image saved!"));
}

// ─── Scheduled actions ─────────────────────────────────────

#[tokio::test]
async fn test_reminder_action_pushes() {
    let server = start_test_server(&[], true).await;
    let (status, body) = post_json(&server.base, "/actions", r#"{"event": {"id": "reminder"}}"#).await;
    assert_eq!(status, 200);
    assert!(body.contains("reminder sent"));

    let calls = server.line_calls.lock().unwrap().clone();
    assert_eq!(calls[0].0, "push");
    assert_eq!(calls[0].1["to"], "U1");
    assert_eq!(calls[0].1["messages"][0]["text"], "Time to write!");
}

#[tokio::test]
async fn test_review_action_pushes_past_note() {
    let server = start_test_server(&[], true).await;
    let (status, _) = post_json(&server.base, "/actions", r#"{"event": {"id": "review"}}"#).await;
    assert_eq!(status, 200);

    let calls = server.line_calls.lock().unwrap().clone();
    let text = calls[0].1["messages"][0]["text"].as_str().unwrap().to_string();
    assert!(text.contains("days ago)\n\n"));
    assert!(text.ends_with("No content found."));
}

#[tokio::test]
async fn test_sweep_and_unknown_actions() {
    let server = start_test_server(&[], true).await;

    let (status, body) = post_json(&server.base, "/actions", r#"{"event": {"id": "sweep"}}"#).await;
    assert_eq!(status, 200);
    assert!(body.contains("swept 0 sessions"));

    let (status, body) = post_json(&server.base, "/actions", r#"{"event": {"id": "party"}}"#).await;
    assert_eq!(status, 200);
    assert!(body.contains("no action found"));
    assert!(server.line_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_actions_need_line() {
    let server = start_test_server(&[], false).await;
    let (status, body) = post_json(&server.base, "/actions", r#"{"event": {"id": "reminder"}}"#).await;
    assert_eq!(status, 503);
    assert!(body.contains("LINE is not configured"));
}
