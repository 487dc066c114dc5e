// WS method names accepted after the handshake.

use serde::{Deserialize, Serialize};

// handshake
pub const CONNECT: &str = "connect";
pub const PING: &str = "ping";

// chat
pub const CHAT_SEND: &str = "chat.send";
pub const CHAT_ABORT: &str = "chat.abort";

// threads
pub const THREADS_LIST: &str = "threads.list";
pub const THREADS_HISTORY: &str = "threads.history";
pub const THREADS_DELETE: &str = "threads.delete";

// per-connection settings
pub const MODELS_LIST: &str = "models.list";
pub const SETTINGS_GET: &str = "settings.get";
pub const SETTINGS_UPDATE: &str = "settings.update";

// new-chat screen
pub const STARTERS_LIST: &str = "starters.list";

/// `chat.send` params. A missing `thread_id` starts a new thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSendParams {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Params for every method that targets a single thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadParams {
    pub thread_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThreadsListParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `settings.update` params. Absent fields keep their current value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// `chat.abort` params. Without `req_id` every running turn of the
/// connection is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatAbortParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}
