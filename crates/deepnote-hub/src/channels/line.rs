//! LINE Messaging API channel — direct HTTP API, no heavy SDK.
//!
//! Supports: reply (one token, up to five messages), push to a user id, and
//! downloading image content referenced by webhook events.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use deepnote_core::channel::ChannelAdapter;
use deepnote_core::error::{DeepNoteError, Result};
use deepnote_core::message::{Channel, OutboundMessage};

/// Maximum messages per reply or push call.
pub const MAX_MESSAGES_PER_CALL: usize = 5;

/// Text messages are capped at 5000 characters by the platform.
pub const MAX_TEXT_CHARS: usize = 4900;

/// LINE channel configuration.
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Long-lived channel access token.
    pub channel_access_token: String,
    /// Messaging API base URL.
    pub api_base: String,
    /// Content API base URL (binary downloads).
    pub data_api_base: String,
}

impl LineConfig {
    pub fn new(channel_access_token: &str) -> Self {
        Self {
            channel_access_token: channel_access_token.to_string(),
            api_base: "https://api.line.me".to_string(),
            data_api_base: "https://api-data.line.me".to_string(),
        }
    }
}

/// LINE channel — sends replies and pushes, fetches message content.
#[derive(Clone)]
pub struct LineChannel {
    config: LineConfig,
    client: Client,
}

impl LineChannel {
    pub fn new(config: LineConfig) -> Self {
        Self {
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Answer a webhook event. A reply token is single-use, so every text goes in one call.
    pub async fn reply(&self, reply_token: &str, texts: &[String]) -> Result<()> {
        let (messages, dropped) = reply_messages(texts);
        if dropped > 0 {
            warn!(
                "Reply has {} messages, dropping the last {}",
                messages.len() + dropped,
                dropped
            );
        }
        let body = ReplyBody { reply_token, messages };
        self.post("/v2/bot/message/reply", &body).await
    }

    /// Push texts to a user, five messages per call.
    pub async fn push(&self, to: &str, texts: &[String]) -> Result<()> {
        let messages = text_messages(texts);
        for batch in messages.chunks(MAX_MESSAGES_PER_CALL) {
            let body = PushBody {
                to,
                messages: batch.to_vec(),
            };
            self.post("/v2/bot/message/push", &body).await?;
        }
        Ok(())
    }

    /// Download the binary content of a message, returning the bytes and a file extension.
    pub async fn fetch_content(&self, message_id: &str) -> Result<(Vec<u8>, String)> {
        let url = format!(
            "{}/v2/bot/message/{}/content",
            self.config.data_api_base.trim_end_matches('/'),
            message_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.channel_access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeepNoteError::Transport(format!(
                "LINE content download failed ({})",
                status
            )));
        }

        let extension = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for)
            .unwrap_or("jpg")
            .to_string();
        let data = resp.bytes().await?.to_vec();
        info!("Downloaded LINE content {} ({} bytes)", message_id, data.len());
        Ok((data, extension))
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.channel_access_token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!("LINE API {} failed ({}): {}", path, status, text);
            return Err(DeepNoteError::Transport(format!(
                "LINE API {} failed ({})",
                path, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for LineChannel {
    fn channel_type(&self) -> Channel {
        Channel::Line
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        let texts = [msg.content];
        match msg.reply_token.as_deref() {
            Some(token) => self.reply(token, &texts).await,
            None => self.push(&msg.chat_id, &texts).await,
        }
    }

    /// Replies sharing a token are merged into one call; pushes go out per recipient.
    async fn send_all(&self, msgs: Vec<OutboundMessage>) -> Result<()> {
        let mut groups: Vec<(Option<String>, String, Vec<String>)> = Vec::new();
        for msg in msgs {
            match groups.last_mut() {
                Some((token, to, texts)) if *token == msg.reply_token && *to == msg.chat_id => {
                    texts.push(msg.content);
                }
                _ => groups.push((msg.reply_token, msg.chat_id, vec![msg.content])),
            }
        }

        for (token, to, texts) in groups {
            match token {
                Some(token) => self.reply(&token, &texts).await?,
                None => self.push(&to, &texts).await?,
            }
        }
        Ok(())
    }
}

// ─── LINE API Types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct TextMessage {
    r#type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage>,
}

#[derive(Debug, Serialize)]
struct PushBody<'a> {
    to: &'a str,
    messages: Vec<TextMessage>,
}

/// Webhook request body.
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub reply_token: Option<String>,
    pub source: Option<EventSource>,
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
}

/// What a webhook event asks the assistant to do.
#[derive(Debug, PartialEq)]
pub enum EventAction<'a> {
    Text { reply_token: &'a str, text: &'a str },
    Image { reply_token: &'a str, message_id: &'a str },
    Ignore,
}

impl WebhookEvent {
    /// Only message events with a reply token are acted on.
    pub fn action(&self) -> EventAction<'_> {
        let (Some(token), Some(msg)) = (self.reply_token.as_deref(), self.message.as_ref()) else {
            return EventAction::Ignore;
        };
        if self.kind != "message" {
            return EventAction::Ignore;
        }
        match (msg.kind.as_str(), msg.text.as_deref()) {
            ("text", Some(text)) => EventAction::Text {
                reply_token: token,
                text,
            },
            ("image", _) => EventAction::Image {
                reply_token: token,
                message_id: &msg.id,
            },
            _ => EventAction::Ignore,
        }
    }
}

// ─── Helpers ───────────────────────────────────────────────

fn text_messages(texts: &[String]) -> Vec<TextMessage> {
    texts
        .iter()
        .flat_map(|t| split_message(t, MAX_TEXT_CHARS))
        .filter(|t| !t.trim().is_empty())
        .map(|text| TextMessage {
            r#type: "text",
            text,
        })
        .collect()
}

/// Messages that fit in one reply call, and how many did not.
fn reply_messages(texts: &[String]) -> (Vec<TextMessage>, usize) {
    let mut messages = text_messages(texts);
    let dropped = messages.len().saturating_sub(MAX_MESSAGES_PER_CALL);
    messages.truncate(MAX_MESSAGES_PER_CALL);
    (messages, dropped)
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Split a long message into chunks at line boundaries, counting characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();
        if current_len + line_len + 1 > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            // A single line over the limit is hard split.
            if line_len > max_chars {
                let chars: Vec<char> = line.chars().collect();
                for piece in chars.chunks(max_chars) {
                    chunks.push(piece.iter().collect());
                }
                continue;
            }
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
