//! HTTP server — REST API, LINE webhook and scheduled actions.
//!
//! Endpoints:
//! - GET  /health — Health check
//! - POST /api/message — Send a message and get the assistant's reply
//! - GET  /api/session/{session_id} — Inspect a session
//! - POST /callback — LINE webhook
//! - POST /actions — Scheduled triggers (`reminder`, `review`, `sweep`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use deepnote_core::{DeepNoteError, NoteAssistant};
use deepnote_core::channel::ChannelAdapter;
use deepnote_core::config::DeepNoteConfig;
use deepnote_core::message::{Channel, InboundMessage, OutboundMessage};
use deepnote_core::questions::Question;
use deepnote_core::session::{PUSH_SESSION_KEY, QaPair, SessionState};

use crate::channels::line::{EventAction, LineChannel, LineConfig, WebhookBody};
use crate::middleware::logging_middleware;

/// Push target and canned texts for the LINE side.
pub struct LinePush {
    pub channel: LineChannel,
    pub user_id: String,
    pub reminder_message: String,
}

/// Shared API state.
pub struct ApiState {
    pub assistant: Arc<NoteAssistant>,
    pub line: Option<LinePush>,
    pub push_timeout_minutes: i64,
    pub api_timeout_minutes: i64,
}

impl ApiState {
    pub fn new(assistant: Arc<NoteAssistant>, config: &DeepNoteConfig) -> Self {
        let line = config.line.as_ref().map(|l| LinePush {
            channel: LineChannel::new(LineConfig::new(&l.channel_access_token)),
            user_id: l.user_id.clone(),
            reminder_message: l.reminder_message.clone(),
        });
        Self {
            assistant,
            line,
            push_timeout_minutes: config.deep_dive.push_timeout_minutes,
            api_timeout_minutes: config.deep_dive.api_timeout_minutes,
        }
    }
}

type SharedState = Arc<ApiState>;

// ─── Request/Response types ────────────────────────────────

#[derive(Deserialize)]
pub struct MessageRequest {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub session_state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub session_state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_pairs: Option<Vec<QaPair>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
}

#[derive(Deserialize)]
pub struct ActionRequest {
    pub event: ActionEvent,
}

#[derive(Deserialize)]
pub struct ActionEvent {
    pub id: String,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// ─── Handlers ──────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn send_message(
    State(state): State<SharedState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> (StatusCode, Json<MessageResponse>) {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let err = DeepNoteError::Transport(rejection.body_text());
            warn!("Rejected message request: {}", err);
            let reply = MessageResponse {
                success: false,
                message: "Could not read the request. Send JSON like {\"message\": \"...\"}.".into(),
                session_id: String::new(),
                session_state: SessionState::Error,
                questions: None,
                error: Some(err.to_string()),
            };
            return (rejection.status(), Json(reply));
        }
    };

    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let msg = InboundMessage::text(Channel::Http, &session_id, &req.message);
    let turn = state.assistant.handle(msg, state.api_timeout_minutes).await;

    (
        StatusCode::OK,
        Json(MessageResponse {
            success: turn.success,
            message: turn.message(),
            session_id,
            session_state: turn.state,
            questions: turn.questions,
            error: turn.error,
        }),
    )
}

async fn session_status(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session = state
        .assistant
        .session(&session_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Session not found"))?;

    Ok(Json(SessionStatusResponse {
        session_id,
        session_state: session.awaiting.state(),
        questions: (!session.questions.is_empty()).then_some(session.questions),
        qa_pairs: Some(session.qa_pairs),
        last_activity: Some(session.last_activity_at.to_rfc3339()),
    }))
}

/// LINE webhook. Anything that cannot be processed is acknowledged and dropped.
async fn callback(State(state): State<SharedState>, body: String) -> &'static str {
    let webhook: WebhookBody = match serde_json::from_str(&body) {
        Ok(w) => w,
        Err(e) => {
            warn!("Ignoring webhook: {}", DeepNoteError::Transport(e.to_string()));
            return "OK";
        }
    };

    for event in &webhook.events {
        let (reply_token, msg) = match event.action() {
            EventAction::Text { reply_token, text } => (
                reply_token,
                InboundMessage::text(Channel::Line, PUSH_SESSION_KEY, text),
            ),
            EventAction::Image {
                reply_token,
                message_id,
            } => {
                let Some(line) = state.line.as_ref() else {
                    warn!("Image event received but LINE is not configured");
                    continue;
                };
                match line.channel.fetch_content(message_id).await {
                    Ok((data, ext)) => (
                        reply_token,
                        InboundMessage::image(Channel::Line, PUSH_SESSION_KEY, data, &ext),
                    ),
                    Err(e) => {
                        error!("Failed to download image {}: {}", message_id, e);
                        continue;
                    }
                }
            }
            EventAction::Ignore => continue,
        };

        let turn = state.assistant.handle(msg, state.push_timeout_minutes).await;

        match state.line.as_ref() {
            Some(line) => {
                let replies = turn
                    .replies
                    .iter()
                    .map(|r| OutboundMessage::reply(Channel::Line, reply_token, r))
                    .collect();
                if let Err(e) = line.channel.send_all(replies).await {
                    error!("Failed to reply on LINE: {}", e);
                }
            }
            None => warn!("LINE is not configured; reply dropped"),
        }
    }

    "OK"
}

async fn actions(
    State(state): State<SharedState>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    info!("Action triggered: {}", req.event.id);

    let message = match req.event.id.as_str() {
        "reminder" => {
            let line = line_or_unavailable(&state)?;
            push(line, &[line.reminder_message.clone()]).await?;
            "reminder sent".to_string()
        }
        "review" => {
            let line = line_or_unavailable(&state)?;
            let mut rng = StdRng::from_entropy();
            let text = state
                .assistant
                .review(&mut rng, Utc::now())
                .await
                .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))?;
            push(line, &[text]).await?;
            "review sent".to_string()
        }
        "sweep" => {
            let swept = sweep(&state).await;
            format!("swept {} sessions", swept)
        }
        _ => "no action found for this event".to_string(),
    };

    Ok(Json(ActionResponse { message }))
}

fn line_or_unavailable(state: &ApiState) -> Result<&LinePush, ApiError> {
    state
        .line
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "LINE is not configured"))
}

async fn push(line: &LinePush, texts: &[String]) -> Result<(), ApiError> {
    let msgs = texts
        .iter()
        .map(|t| OutboundMessage::push(Channel::Line, &line.user_id, t))
        .collect();
    line.channel
        .send_all(msgs)
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))
}

/// Clear stale sessions, telling the LINE user when theirs was one of them.
pub async fn sweep(state: &ApiState) -> usize {
    let swept = state.assistant.sweep_expired(Utc::now()).await;
    if swept.timed_out.iter().any(|k| k == PUSH_SESSION_KEY) {
        if let Some(line) = state.line.as_ref() {
            let notice = format!(
                "The deep-dive session timed out ({} minutes without activity). \
                 Send a new memo any time.",
                state.push_timeout_minutes
            );
            let msg = OutboundMessage::push(Channel::Line, &line.user_id, &notice);
            if let Err(e) = line.channel.send(msg).await {
                error!("Failed to send timeout notice: {}", e);
            }
        }
    }
    swept.total()
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/message", post(send_message))
        .route("/api/session/{session_id}", get(session_status))
        .route("/callback", post(callback))
        .route("/actions", post(actions))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Start the server, sweeping stale sessions every `sweep_every`.
pub async fn start_server(
    state: ApiState,
    host: &str,
    port: u16,
    sweep_every: Duration,
) -> anyhow::Result<()> {
    let shared = Arc::new(state);

    let sweeper = shared.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            sweep(&sweeper).await;
        }
    });

    let app = build_router(shared);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("DeepNote server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
