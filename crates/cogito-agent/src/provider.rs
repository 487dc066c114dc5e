use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::{Delta, StreamEvent};

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse a stored role string. Unknown roles are treated as user input.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// Request to an upstream model.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    /// Prior turns followed by the new user message (last element).
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl ChatRequest {
    /// The most recent user message, used by backends that take a single input.
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Response from an upstream model (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Full response text. Reasoning delivered out-of-band is folded in as a
    /// leading `<think>` block so callers see one uniform shape.
    pub content: String,
    pub model: String,
}

/// Common interface for all upstream chat backends (OpenAI-compatible, Langflow).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response deltas through a channel.
    /// Default: falls back to non-streaming send, emits one Delta + Done.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        let _ = tx.send(StreamEvent::Delta(Delta::text(resp.content))).await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                stop_reason: "stop".to_string(),
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map a reqwest send failure, surfacing connection problems as `Unavailable`.
    pub fn from_send(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ProviderError::Unavailable(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Longest body excerpt carried into a user-visible error message.
pub const ERROR_BODY_SNIPPET: usize = 300;

/// Trim an upstream error body to something that fits in a chat bubble.
pub fn body_snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_SNIPPET) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
