//! Session relay: drives one chat turn from upstream request to the two UI sinks.
//!
//! The provider pushes [`StreamEvent`]s into a bounded channel while a single
//! `select!` loop owns the classifier and the answer accumulator. Dropping the
//! provider future (on cancellation or error) closes the upstream connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cogito_core::config::{ChatConfig, ModelProfile, ReopenPolicy};

use crate::provider::{body_snippet, ChatRequest, LlmProvider, Message, ProviderError};
use crate::stream::StreamEvent;
use crate::thinking::{ClassifiedEvent, Markers, ThinkingClassifier};

const STREAM_BUFFER: usize = 64;

/// Collapsible reasoning panel.
#[async_trait]
pub trait ThinkingSink: Send {
    async fn open(&mut self);
    async fn append_token(&mut self, token: &str);
    async fn set_label(&mut self, label: &str);
    async fn close(&mut self);
}

/// Main answer bubble.
#[async_trait]
pub trait AnswerSink: Send {
    async fn append_token(&mut self, token: &str);
    /// Commit the complete answer. Called once, on a clean end of stream.
    async fn send(&mut self, content: &str);
    /// Show one user-visible error instead of an answer.
    async fn fail(&mut self, message: &str);
}

/// Everything a turn needs to know about the session's current choices.
/// Passed explicitly; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub profile_id: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub markers: Markers,
    pub reopen_policy: ReopenPolicy,
}

impl TurnSettings {
    pub fn from_profile(profile: &ModelProfile, chat: &ChatConfig) -> Self {
        Self {
            profile_id: profile.id.clone(),
            model: profile.model_name().to_string(),
            temperature: profile.temperature,
            system_prompt: chat.system_prompt.clone(),
            markers: Markers::new(chat.think_open.clone(), chat.think_close.clone()),
            reopen_policy: chat.reopen_policy,
        }
    }
}

/// The new user message plus the history snapshot to replay.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub history: Vec<Message>,
    pub user_text: String,
}

/// Result of a turn that streamed to completion.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub answer: String,
    /// All reasoning text shown in the thinking panel(s).
    pub thinking: String,
    /// Total whole seconds spent thinking, when any thinking happened.
    pub thinking_seconds: Option<u64>,
    pub model: String,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("upstream stream failed: {0}")]
    Stream(String),

    #[error("turn cancelled")]
    Cancelled,
}

impl RelayError {
    /// Message shown in the answer panel.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::BadStatus { status, body } => {
                format!("Sorry, the model request failed: {status} - {}", body_snippet(body))
            }
            other => format!("Sorry, something went wrong: {other}"),
        }
    }
}

impl From<ProviderError> for RelayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Api { status, message } => RelayError::BadStatus {
                status,
                body: message,
            },
            ProviderError::Http(e) => RelayError::Unavailable(e.to_string()),
            ProviderError::Unavailable(m) => RelayError::Unavailable(m),
            ProviderError::Cancelled => RelayError::Cancelled,
            ProviderError::Parse(m) | ProviderError::Decode(m) => RelayError::Stream(m),
        }
    }
}

/// `"Thought for {n}s"` with `n` rounded to the nearest second.
pub fn thought_label(elapsed: Duration) -> (String, u64) {
    let secs = elapsed.as_secs_f64().round() as u64;
    (format!("Thought for {secs}s"), secs)
}

/// Per-turn accumulator: owned by the relay loop, never shared.
struct TurnState {
    classifier: ThinkingClassifier,
    /// A thinking panel is open on the sink.
    panel_open: bool,
    answer: String,
    thinking: String,
    thinking_seconds: Option<u64>,
}

impl TurnState {
    fn new(settings: &TurnSettings) -> Self {
        Self {
            classifier: ThinkingClassifier::new(settings.markers.clone(), settings.reopen_policy),
            panel_open: false,
            answer: String::new(),
            thinking: String::new(),
            thinking_seconds: None,
        }
    }

    async fn dispatch<T, A>(&mut self, events: Vec<ClassifiedEvent>, thinking: &mut T, answer: &mut A)
    where
        T: ThinkingSink + ?Sized,
        A: AnswerSink + ?Sized,
    {
        for event in events {
            match event {
                ClassifiedEvent::ThinkingStart => {
                    if !self.thinking.is_empty() {
                        self.thinking.push_str("\n\n");
                    }
                    self.panel_open = true;
                    thinking.open().await;
                }
                ClassifiedEvent::ThinkingToken(t) => {
                    self.thinking.push_str(&t);
                    thinking.append_token(&t).await;
                }
                ClassifiedEvent::ThinkingEnd { duration } => {
                    if std::mem::take(&mut self.panel_open) {
                        let (label, secs) = thought_label(duration);
                        self.thinking_seconds = Some(self.thinking_seconds.unwrap_or(0) + secs);
                        thinking.set_label(&label).await;
                        thinking.close().await;
                    }
                }
                ClassifiedEvent::AnswerToken(t) => {
                    self.answer.push_str(&t);
                    answer.append_token(&t).await;
                }
            }
        }
    }

    /// Close an open panel without a label (error or cancellation path).
    async fn abandon<T: ThinkingSink + ?Sized>(&mut self, thinking: &mut T) {
        if std::mem::take(&mut self.panel_open) {
            thinking.close().await;
        }
    }
}

/// Runs chat turns against one upstream provider.
pub struct Relay {
    provider: Arc<dyn LlmProvider>,
}

impl Relay {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn build_request(settings: &TurnSettings, turn: &TurnRequest) -> ChatRequest {
        let mut messages = turn.history.clone();
        messages.push(Message::user(turn.user_text.clone()));
        ChatRequest {
            model: settings.model.clone(),
            system: settings.system_prompt.clone(),
            messages,
            temperature: Some(settings.temperature),
            stream: true,
        }
    }

    /// Stream one turn into the sinks.
    ///
    /// On success the answer sink has received `send(full_text)`. On any
    /// upstream failure it has received exactly one `fail(..)`. Cancellation
    /// emits nothing on the answer sink.
    pub async fn run<T, A>(
        &self,
        settings: &TurnSettings,
        turn: TurnRequest,
        thinking: &mut T,
        answer: &mut A,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RelayError>
    where
        T: ThinkingSink + ?Sized,
        A: AnswerSink + ?Sized,
    {
        let started = Instant::now();
        let request = Self::build_request(settings, &turn);
        let mut state = TurnState::new(settings);
        let mut model = settings.model.clone();

        debug!(
            provider = self.provider.name(),
            model = %request.model,
            history = turn.history.len(),
            "relay turn started"
        );

        let result: Result<(), RelayError> = {
            let (tx, mut rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
            let send_fut = self.provider.send_stream(&request, tx);
            tokio::pin!(send_fut);
            let mut producer_done = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Err(RelayError::Cancelled),
                    event = rx.recv() => match event {
                        Some(StreamEvent::Delta(delta)) => {
                            let events = state.classifier.feed(&delta);
                            state.dispatch(events, thinking, answer).await;
                        }
                        Some(StreamEvent::Done { model: m, stop_reason }) => {
                            debug!(model = %m, stop_reason = %stop_reason, "upstream stream done");
                            if !m.is_empty() {
                                model = m;
                            }
                        }
                        Some(StreamEvent::Error { message }) => {
                            warn!(error = %message, "upstream stream error");
                            break Err(RelayError::Stream(message));
                        }
                        // sender dropped: the provider future has finished
                        None => break Ok(()),
                    },
                    result = &mut send_fut, if !producer_done => {
                        producer_done = true;
                        if let Err(e) = result {
                            warn!(error = %e, provider = self.provider.name(), "send_stream failed");
                            break Err(RelayError::from(e));
                        }
                    }
                }
            }
            // send_fut dropped here, releasing the upstream connection
        };

        match result {
            Ok(()) => {
                let events = state.classifier.finish();
                state.dispatch(events, thinking, answer).await;
                answer.send(&state.answer).await;

                let elapsed = started.elapsed();
                info!(
                    model = %model,
                    answer_len = state.answer.len(),
                    thinking_len = state.thinking.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "relay turn complete"
                );

                Ok(TurnOutcome {
                    answer: state.answer,
                    thinking: state.thinking,
                    thinking_seconds: state.thinking_seconds,
                    model,
                    elapsed,
                })
            }
            Err(RelayError::Cancelled) => {
                info!("relay turn cancelled");
                state.abandon(thinking).await;
                Err(RelayError::Cancelled)
            }
            Err(e) => {
                state.abandon(thinking).await;
                answer.fail(&e.user_message()).await;
                Err(e)
            }
        }
    }
}
