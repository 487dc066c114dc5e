//! One chat turn, shared by the WebSocket and `POST /chat` surfaces.
//!
//! The relay streams into two panel sinks that turn sink calls into protocol
//! events. Where those events go (a WS connection, an SSE body) is behind
//! [`FrameOut`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cogito_agent::relay::{AnswerSink, Relay, RelayError, ThinkingSink, TurnOutcome, TurnRequest};
use cogito_agent::title::generate_title;
use cogito_agent::{LlmProvider, Markers, Message, TurnSettings};
use cogito_core::CogitoError;
use cogito_protocol::events::{
    AnswerDone, AnswerError, TextDelta, ThinkingEnd, ThreadTitle, TurnRef, ANSWER_DELTA,
    ANSWER_DONE, ANSWER_ERROR, THINKING_DELTA, THINKING_END, THINKING_START, THREAD_TITLE,
};
use cogito_protocol::frames::EventFrame;
use cogito_threads::{MessageRole, NewMessage};

use crate::app::AppState;
use crate::session::ChatSettings;

/// Destination for server push events.
#[async_trait]
pub trait FrameOut: Send + Sync {
    /// Returns `false` once the receiving side is gone.
    async fn emit(&self, frame: EventFrame) -> bool;
}

#[async_trait]
impl FrameOut for mpsc::Sender<EventFrame> {
    async fn emit(&self, frame: EventFrame) -> bool {
        self.send(frame).await.is_ok()
    }
}

/// Collapsible reasoning panel. The label set by the relay rides on `thinking.end`.
pub struct ThinkingPanel {
    out: Arc<dyn FrameOut>,
    req_id: String,
    label: Option<String>,
}

impl ThinkingPanel {
    pub fn new(out: Arc<dyn FrameOut>, req_id: &str) -> Self {
        Self {
            out,
            req_id: req_id.to_string(),
            label: None,
        }
    }
}

#[async_trait]
impl ThinkingSink for ThinkingPanel {
    async fn open(&mut self) {
        self.label = None;
        let payload = TurnRef {
            req_id: self.req_id.clone(),
        };
        self.out.emit(EventFrame::new(THINKING_START, payload)).await;
    }

    async fn append_token(&mut self, token: &str) {
        let payload = TextDelta {
            req_id: self.req_id.clone(),
            text: token.to_string(),
        };
        self.out.emit(EventFrame::new(THINKING_DELTA, payload)).await;
    }

    async fn set_label(&mut self, label: &str) {
        self.label = Some(label.to_string());
    }

    async fn close(&mut self) {
        let payload = ThinkingEnd {
            req_id: self.req_id.clone(),
            label: self.label.take(),
        };
        self.out.emit(EventFrame::new(THINKING_END, payload)).await;
    }
}

/// Main answer panel.
pub struct AnswerPanel {
    out: Arc<dyn FrameOut>,
    req_id: String,
    thread_id: String,
}

impl AnswerPanel {
    pub fn new(out: Arc<dyn FrameOut>, req_id: &str, thread_id: &str) -> Self {
        Self {
            out,
            req_id: req_id.to_string(),
            thread_id: thread_id.to_string(),
        }
    }
}

#[async_trait]
impl AnswerSink for AnswerPanel {
    async fn append_token(&mut self, token: &str) {
        let payload = TextDelta {
            req_id: self.req_id.clone(),
            text: token.to_string(),
        };
        self.out.emit(EventFrame::new(ANSWER_DELTA, payload)).await;
    }

    async fn send(&mut self, content: &str) {
        let payload = AnswerDone {
            req_id: self.req_id.clone(),
            thread_id: self.thread_id.clone(),
            content: content.to_string(),
        };
        self.out.emit(EventFrame::new(ANSWER_DONE, payload)).await;
    }

    async fn fail(&mut self, message: &str) {
        let payload = AnswerError {
            req_id: self.req_id.clone(),
            message: message.to_string(),
        };
        self.out.emit(EventFrame::new(ANSWER_ERROR, payload)).await;
    }
}

/// A validated `chat.send` ready to run.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub req_id: String,
    pub user_id: String,
    pub thread_id: String,
    pub text: String,
    pub settings: ChatSettings,
}

/// Return the id of a thread the user owns, creating one when `thread_id` is absent.
///
/// Threads owned by someone else are reported as missing.
pub fn resolve_thread(
    app: &AppState,
    user_id: &str,
    thread_id: Option<&str>,
) -> Result<String, CogitoError> {
    match thread_id {
        Some(id) => owned_thread(app, user_id, id).map(|t| t.id),
        None => Ok(app.threads.create_thread(user_id)?.id),
    }
}

pub fn owned_thread(
    app: &AppState,
    user_id: &str,
    thread_id: &str,
) -> Result<cogito_threads::Thread, CogitoError> {
    match app.threads.get_thread(thread_id)? {
        Some(thread) if thread.user_id == user_id => Ok(thread),
        _ => Err(CogitoError::NotFound {
            what: format!("thread {thread_id}"),
        }),
    }
}

/// Stream one turn into the panels, then persist it.
///
/// Both messages are stored only when the turn completes, so a failed or
/// cancelled turn leaves the thread unchanged. The first completed turn of a
/// thread spawns title generation.
pub async fn run_turn(
    app: Arc<AppState>,
    turn: ChatTurn,
    out: Arc<dyn FrameOut>,
    cancel: CancellationToken,
) -> Result<TurnOutcome, RelayError> {
    let entry = app.registry.get(&turn.settings.model);
    let mut settings = TurnSettings::from_profile(&entry.profile, &app.config.chat);
    settings.temperature = turn.settings.temperature;

    let prior = app.threads.message_count(&turn.thread_id).unwrap_or_else(|e| {
        warn!(thread_id = %turn.thread_id, error = %e, "message count failed");
        0
    });
    let history = load_history(&app, &turn.thread_id);

    info!(
        req_id = %turn.req_id,
        user_id = %turn.user_id,
        thread_id = %turn.thread_id,
        model = %settings.profile_id,
        history = history.len(),
        "chat turn started"
    );

    let mut thinking = ThinkingPanel::new(out.clone(), &turn.req_id);
    let mut answer = AnswerPanel::new(out.clone(), &turn.req_id, &turn.thread_id);
    let relay = Relay::new(entry.provider.clone());
    let request = TurnRequest {
        history,
        user_text: turn.text.clone(),
    };

    let result = relay
        .run(&settings, request, &mut thinking, &mut answer, &cancel)
        .await;

    match &result {
        Ok(outcome) => {
            persist_turn(&app, &turn, outcome);
            info!(
                req_id = %turn.req_id,
                answer_len = outcome.answer.len(),
                thinking_secs = ?outcome.thinking_seconds,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "chat turn finished"
            );
            if prior == 0 && app.config.chat.generate_titles {
                spawn_title_task(
                    app.clone(),
                    entry.provider.clone(),
                    settings.model.clone(),
                    settings.markers.clone(),
                    turn.thread_id.clone(),
                    turn.text.clone(),
                    outcome.answer.clone(),
                    out,
                );
            }
        }
        Err(RelayError::Cancelled) => info!(req_id = %turn.req_id, "chat turn cancelled"),
        Err(e) => warn!(req_id = %turn.req_id, error = %e, "chat turn failed"),
    }
    result
}

fn load_history(app: &AppState, thread_id: &str) -> Vec<Message> {
    let limit = app.config.chat.history_limit;
    if limit == 0 {
        return Vec::new();
    }
    match app.threads.history(thread_id, limit) {
        Ok(messages) => messages
            .into_iter()
            .map(|m| match m.role {
                MessageRole::User => Message::user(m.content),
                MessageRole::Assistant => Message::assistant(m.content),
            })
            .collect(),
        Err(e) => {
            warn!(thread_id, error = %e, "history load failed, sending turn without context");
            Vec::new()
        }
    }
}

fn persist_turn(app: &AppState, turn: &ChatTurn, outcome: &TurnOutcome) {
    let user = NewMessage::user(&turn.text);
    let assistant = NewMessage::assistant(&outcome.answer)
        .with_thinking(&outcome.thinking, outcome.thinking_seconds)
        .with_model(&outcome.model);

    match app.threads.append_turn(&turn.thread_id, &user, &assistant) {
        Ok(_) => debug!(thread_id = %turn.thread_id, "turn persisted"),
        Err(e) => warn!(thread_id = %turn.thread_id, error = %e, "failed to persist turn"),
    }
}

/// Fire-and-forget: a failed title leaves the thread untitled.
#[allow(clippy::too_many_arguments)]
fn spawn_title_task(
    app: Arc<AppState>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    markers: Markers,
    thread_id: String,
    user_text: String,
    answer: String,
    out: Arc<dyn FrameOut>,
) {
    tokio::spawn(async move {
        let max_chars = app.config.chat.title_max_chars;
        let title = match generate_title(
            provider.as_ref(),
            &model,
            &user_text,
            &answer,
            &markers,
            max_chars,
        )
        .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "title generation failed");
                return;
            }
        };

        if let Err(e) = app.threads.update_thread_title(&thread_id, &title) {
            warn!(thread_id = %thread_id, error = %e, "failed to store thread title");
            return;
        }
        info!(thread_id = %thread_id, title = %title, "thread titled");
        out.emit(EventFrame::new(THREAD_TITLE, ThreadTitle { thread_id, title }))
            .await;
    });
}
