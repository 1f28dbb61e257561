//! Message types — what flows in from chat front-ends and out to the LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel type identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Cli,
    Line,
    Http,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Line => write!(f, "line"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Body of an inbound message.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Image { data: Vec<u8>, extension: String },
}

/// A message flowing into the assistant from any channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub channel: Channel,
    /// Session key the message belongs to.
    pub session_key: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(channel: Channel, session_key: &str, content: &str) -> Self {
        Self::with_payload(channel, session_key, Payload::Text(content.to_string()))
    }

    pub fn image(channel: Channel, session_key: &str, data: Vec<u8>, extension: &str) -> Self {
        Self::with_payload(
            channel,
            session_key,
            Payload::Image {
                data,
                extension: extension.to_string(),
            },
        )
    }

    fn with_payload(channel: Channel, session_key: &str, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel,
            session_key: session_key.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// A message flowing out from the assistant to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    /// Recipient on the platform (user id for pushes).
    pub chat_id: String,
    pub content: String,
    /// Present when answering a specific inbound event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_token: Option<String>,
}

impl OutboundMessage {
    pub fn push(channel: Channel, chat_id: &str, content: &str) -> Self {
        Self {
            channel,
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            reply_token: None,
        }
    }

    pub fn reply(channel: Channel, reply_token: &str, content: &str) -> Self {
        Self {
            channel,
            chat_id: String::new(),
            content: content.to_string(),
            reply_token: Some(reply_token.to_string()),
        }
    }
}

/// Role in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

impl LlmResponse {
    /// Text content, or empty when the model returned none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
