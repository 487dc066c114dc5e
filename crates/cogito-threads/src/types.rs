use serde::{Deserialize, Serialize};

/// A persisted conversation. Titles are filled in asynchronously after the
/// first completed turn, so a fresh thread has `title: None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// UUIDv7 primary key, time-sortable.
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub message_count: u32,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last appended message.
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One stored message. Assistant messages carry the reasoning shown in the
/// thinking panel so a resumed thread can render it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: String,
}

/// Input for [`crate::ThreadStore::append_turn`].
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub role: MessageRole,
    pub content: &'a str,
    pub thinking: Option<&'a str>,
    pub thinking_seconds: Option<u64>,
    pub model: Option<&'a str>,
}

impl<'a> NewMessage<'a> {
    pub fn user(content: &'a str) -> Self {
        Self {
            role: MessageRole::User,
            content,
            thinking: None,
            thinking_seconds: None,
            model: None,
        }
    }

    pub fn assistant(content: &'a str) -> Self {
        Self {
            role: MessageRole::Assistant,
            ..Self::user(content)
        }
    }

    /// Attach reasoning text; empty reasoning is stored as NULL.
    pub fn with_thinking(mut self, thinking: &'a str, seconds: Option<u64>) -> Self {
        if !thinking.is_empty() {
            self.thinking = Some(thinking);
            self.thinking_seconds = seconds;
        }
        self
    }

    pub fn with_model(mut self, model: &'a str) -> Self {
        self.model = Some(model);
        self
    }
}
