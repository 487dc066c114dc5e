// End-to-end relay behaviour against scripted in-memory providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cogito_agent::provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError};
use cogito_agent::relay::{
    AnswerSink, Relay, RelayError, ThinkingSink, TurnRequest, TurnSettings,
};
use cogito_agent::stream::{Delta, StreamEvent};
use cogito_core::config::{ChatConfig, ReopenPolicy};
use cogito_agent::thinking::Markers;

type Log = Arc<Mutex<Vec<String>>>;

struct RecThinking(Log);
struct RecAnswer(Log);

#[async_trait]
impl ThinkingSink for RecThinking {
    async fn open(&mut self) {
        self.0.lock().unwrap().push("thinking.open".to_string());
    }
    async fn append_token(&mut self, token: &str) {
        self.0.lock().unwrap().push(format!("thinking.token:{token}"));
    }
    async fn set_label(&mut self, label: &str) {
        self.0.lock().unwrap().push(format!("thinking.label:{label}"));
    }
    async fn close(&mut self) {
        self.0.lock().unwrap().push("thinking.close".to_string());
    }
}

#[async_trait]
impl AnswerSink for RecAnswer {
    async fn append_token(&mut self, token: &str) {
        self.0.lock().unwrap().push(format!("answer.token:{token}"));
    }
    async fn send(&mut self, content: &str) {
        self.0.lock().unwrap().push(format!("answer.send:{content}"));
    }
    async fn fail(&mut self, message: &str) {
        self.0.lock().unwrap().push(format!("answer.fail:{message}"));
    }
}

/// Replays a fixed list of stream events, then returns `outcome`.
struct Scripted {
    events: Vec<StreamEvent>,
    fail_with: Option<(u16, &'static str)>,
}

impl Scripted {
    fn deltas(deltas: Vec<Delta>) -> Self {
        let mut events: Vec<StreamEvent> = deltas.into_iter().map(StreamEvent::Delta).collect();
        events.push(StreamEvent::Done {
            model: "scripted-model".to_string(),
            stop_reason: "stop".to_string(),
        });
        Self {
            events,
            fail_with: None,
        }
    }
}

#[async_trait]
impl LlmProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Unavailable("streaming only".to_string()))
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        if let Some((status, body)) = self.fail_with {
            return Err(ProviderError::Api {
                status,
                message: body.to_string(),
            });
        }
        for event in &self.events {
            if tx.send(event.clone()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Sends one reasoning delta and then hangs until dropped.
struct Hanging {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        std::future::pending().await
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let _guard = DropFlag(self.dropped.clone());
        let _ = tx
            .send(StreamEvent::Delta(Delta::reasoning("pondering")))
            .await;
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Only implements one-shot `send`; streaming goes through the trait default.
struct OneShot(&'static str);

#[async_trait]
impl LlmProvider for OneShot {
    fn name(&self) -> &str {
        "one-shot"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: self.0.to_string(),
            model: req.model.clone(),
        })
    }
}

fn settings(policy: ReopenPolicy) -> TurnSettings {
    let chat = ChatConfig {
        reopen_policy: policy,
        ..ChatConfig::default()
    };
    TurnSettings {
        profile_id: "test".to_string(),
        model: "test-model".to_string(),
        temperature: 0.7,
        system_prompt: chat.system_prompt.clone(),
        markers: Markers::new(chat.think_open.clone(), chat.think_close.clone()),
        reopen_policy: chat.reopen_policy,
    }
}

fn turn(text: &str) -> TurnRequest {
    TurnRequest {
        history: vec![Message::user("earlier"), Message::assistant("reply")],
        user_text: text.to_string(),
    }
}

async fn run_turn(
    provider: Arc<dyn LlmProvider>,
    policy: ReopenPolicy,
    cancel: &CancellationToken,
) -> (Result<cogito_agent::relay::TurnOutcome, RelayError>, Vec<String>) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut thinking = RecThinking(log.clone());
    let mut answer = RecAnswer(log.clone());
    let relay = Relay::new(provider);
    let result = relay
        .run(&settings(policy), turn("question"), &mut thinking, &mut answer, cancel)
        .await;
    let entries = log.lock().unwrap().clone();
    (result, entries)
}

#[tokio::test]
async fn marker_stream_reaches_both_sinks_in_order() {
    let provider = Scripted::deltas(vec![
        Delta::text("<think>"),
        Delta::text("reasoning text "),
        Delta::text("more.</think>"),
        Delta::text("Final answer."),
    ]);
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    assert_eq!(
        log,
        vec![
            "thinking.open",
            "thinking.token:reasoning text ",
            "thinking.token:more.",
            "thinking.label:Thought for 0s",
            "thinking.close",
            "answer.token:Final answer.",
            "answer.send:Final answer.",
        ]
    );

    let outcome = result.unwrap();
    assert_eq!(outcome.answer, "Final answer.");
    assert_eq!(outcome.thinking, "reasoning text more.");
    assert_eq!(outcome.thinking_seconds, Some(0));
    assert_eq!(outcome.model, "scripted-model");
}

#[tokio::test]
async fn side_channel_reasoning_then_answer() {
    let provider = Scripted::deltas(vec![
        Delta::reasoning("Let me think. "),
        Delta::reasoning("Okay."),
        Delta::text("42"),
    ]);
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    assert_eq!(log.first().map(String::as_str), Some("thinking.open"));
    assert_eq!(log.iter().filter(|l| *l == "thinking.close").count(), 1);
    assert_eq!(log.last().map(String::as_str), Some("answer.send:42"));
    assert_eq!(result.unwrap().thinking, "Let me think. Okay.");
}

#[tokio::test]
async fn unterminated_thinking_closed_at_end_of_stream() {
    let provider = Scripted::deltas(vec![Delta::text("<think>never"), Delta::text(" finished")]);
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    assert_eq!(log.iter().filter(|l| *l == "thinking.close").count(), 1);
    assert!(log.iter().any(|l| l.starts_with("thinking.label:Thought for")));
    assert_eq!(log.last().map(String::as_str), Some("answer.send:"));
    assert_eq!(result.unwrap().answer, "");
}

#[tokio::test]
async fn http_500_surfaces_one_error() {
    let provider = Scripted {
        events: Vec::new(),
        fail_with: Some((500, "server overloaded")),
    };
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    let failures: Vec<&String> = log.iter().filter(|l| l.starts_with("answer.fail:")).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("500"));
    assert!(failures[0].contains("server overloaded"));
    assert!(log.iter().all(|l| !l.starts_with("thinking.")));
    assert!(log.iter().all(|l| !l.starts_with("answer.send")));
    assert!(matches!(
        result,
        Err(RelayError::BadStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn mid_stream_error_closes_thinking_without_label() {
    let provider = Scripted {
        events: vec![
            StreamEvent::Delta(Delta::reasoning("half a thought")),
            StreamEvent::Error {
                message: "connection reset".to_string(),
            },
        ],
        fail_with: None,
    };
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    assert_eq!(
        log[..3],
        [
            "thinking.open".to_string(),
            "thinking.token:half a thought".to_string(),
            "thinking.close".to_string(),
        ]
    );
    assert!(log.iter().all(|l| !l.starts_with("thinking.label")));
    assert_eq!(log.iter().filter(|l| l.starts_with("answer.fail:")).count(), 1);
    assert!(log[3].contains("connection reset"));
    assert!(matches!(result, Err(RelayError::Stream(_))));
}

#[tokio::test]
async fn cancellation_drops_upstream_and_closes_panel() {
    let dropped = Arc::new(AtomicBool::new(false));
    let provider = Hanging {
        dropped: dropped.clone(),
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (result, log) = run_turn(Arc::new(provider), ReopenPolicy::Drop, &cancel).await;

    assert!(matches!(result, Err(RelayError::Cancelled)));
    assert!(dropped.load(Ordering::SeqCst), "provider future must be dropped");
    assert_eq!(
        log,
        vec!["thinking.open", "thinking.token:pondering", "thinking.close"]
    );
}

#[tokio::test]
async fn reopen_policy_opens_second_panel() {
    let provider = Scripted::deltas(vec![Delta::text(
        "<think>a</think>b<think>c</think>d",
    )]);
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Reopen, &CancellationToken::new()).await;

    assert_eq!(log.iter().filter(|l| *l == "thinking.open").count(), 2);
    assert_eq!(log.iter().filter(|l| *l == "thinking.close").count(), 2);
    let outcome = result.unwrap();
    assert_eq!(outcome.answer, "bd");
    assert_eq!(outcome.thinking, "a\n\nc");
}

#[tokio::test]
async fn one_shot_provider_streams_through_default() {
    let provider = OneShot("<think>quick</think>Done.");
    let (result, log) =
        run_turn(Arc::new(provider), ReopenPolicy::Drop, &CancellationToken::new()).await;

    assert_eq!(log.first().map(String::as_str), Some("thinking.open"));
    assert_eq!(log.last().map(String::as_str), Some("answer.send:Done."));
    assert_eq!(result.unwrap().model, "test-model");
}
