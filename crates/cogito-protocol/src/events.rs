//! Server → client push events emitted while a chat turn streams.
//!
//! Every chat event carries the `req_id` of the `chat.send` request that
//! started the turn so a client can route tokens to the right message bubble.

use serde::{Deserialize, Serialize};

pub const CONNECT_CHALLENGE: &str = "connect.challenge";
pub const TICK: &str = "tick";

pub const THINKING_START: &str = "thinking.start";
pub const THINKING_DELTA: &str = "thinking.delta";
pub const THINKING_END: &str = "thinking.end";
pub const ANSWER_DELTA: &str = "answer.delta";
pub const ANSWER_DONE: &str = "answer.done";
pub const ANSWER_ERROR: &str = "answer.error";
pub const THREAD_TITLE: &str = "thread.title";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRef {
    pub req_id: String,
}

/// Payload of `thinking.delta` and `answer.delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDelta {
    pub req_id: String,
    pub text: String,
}

/// Payload of `thinking.end`.
///
/// `label` is absent when the panel was closed because the turn failed or
/// was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingEnd {
    pub req_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerDone {
    pub req_id: String,
    pub thread_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerError {
    pub req_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTitle {
    pub thread_id: String,
    pub title: String,
}
