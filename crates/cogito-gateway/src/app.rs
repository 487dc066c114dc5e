use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio_util::sync::CancellationToken;

use cogito_agent::ModelRegistry;
use cogito_core::config::CogitoConfig;
use cogito_threads::ThreadStore;
use cogito_users::UserStore;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CogitoConfig,
    /// Immutable after startup; sessions pick an entry by profile id.
    pub registry: ModelRegistry,
    pub users: UserStore,
    pub threads: ThreadStore,
    pub event_seq: AtomicU64,
    pub ws_connections: AtomicUsize,
    /// Running chat turns keyed by (conn_id, req_id).
    pub active_turns: DashMap<(String, String), CancellationToken>,
}

impl AppState {
    pub fn new(
        config: CogitoConfig,
        registry: ModelRegistry,
        users: UserStore,
        threads: ThreadStore,
    ) -> Self {
        Self {
            config,
            registry,
            users,
            threads,
            event_seq: AtomicU64::new(0),
            ws_connections: AtomicUsize::new(0),
            active_turns: DashMap::new(),
        }
    }

    /// Monotonically increasing sequence for tick events.
    pub fn next_seq(&self) -> u64 {
        self.event_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a turn so `chat.abort` and connection close can cancel it.
    /// Returns `None` while a turn with the same `req_id` is still running on
    /// this connection.
    pub fn register_turn(&self, conn_id: &str, req_id: &str) -> Option<CancellationToken> {
        match self
            .active_turns
            .entry((conn_id.to_string(), req_id.to_string()))
        {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Some(token)
            }
        }
    }

    pub fn finish_turn(&self, conn_id: &str, req_id: &str) {
        self.active_turns
            .remove(&(conn_id.to_string(), req_id.to_string()));
    }

    /// Cancel one turn (`Some(req_id)`) or every turn of a connection.
    /// Returns how many were newly cancelled. Entries stay registered until
    /// their task calls [`AppState::finish_turn`].
    pub fn cancel_turns(&self, conn_id: &str, req_id: Option<&str>) -> usize {
        let mut cancelled = 0;
        for entry in self.active_turns.iter() {
            let (conn, req) = entry.key();
            let hit = conn == conn_id && req_id.map_or(true, |r| r == req);
            if hit && !entry.value().is_cancelled() {
                entry.value().cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::ui::ui_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// In-memory state for handler tests.
#[cfg(test)]
pub(crate) fn test_state(
    config: CogitoConfig,
    provider: Arc<dyn cogito_agent::LlmProvider>,
) -> Arc<AppState> {
    use cogito_agent::registry::ModelEntry;

    let entries = config
        .models
        .iter()
        .map(|profile| ModelEntry {
            profile: profile.clone(),
            provider: provider.clone(),
        })
        .collect();
    let registry = ModelRegistry::new(entries).unwrap();

    let users_db = rusqlite::Connection::open_in_memory().unwrap();
    cogito_users::db::init_db(&users_db).unwrap();
    let threads_db = rusqlite::Connection::open_in_memory().unwrap();
    cogito_threads::db::init_db(&threads_db).unwrap();

    Arc::new(AppState::new(
        config,
        registry,
        UserStore::new(users_db),
        ThreadStore::new(threads_db),
    ))
}

/// Provider double for gateway tests: a fixed reasoning + answer stream, and
/// a fixed one-shot reply used by title generation.
#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use cogito_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use cogito_agent::stream::{Delta, StreamEvent};
    use tokio::sync::mpsc;

    pub struct Scripted;

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "Greeting exchange".to_string(),
                model: req.model.clone(),
            })
        }

        async fn send_stream(
            &self,
            req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            for delta in [
                Delta::text("<think>user says hi"),
                Delta::text("</think>Hello"),
                Delta::text(" there!"),
            ] {
                let _ = tx.send(StreamEvent::Delta(delta)).await;
            }
            let _ = tx
                .send(StreamEvent::Done {
                    model: req.model.clone(),
                    stop_reason: "stop".to_string(),
                })
                .await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cogito_core::config::AuthMode;
    use tower::ServiceExt;

    use crate::app::testing::Scripted;

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_router(test_state(CogitoConfig::default(), Arc::new(Scripted)));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["models"], 3);
    }

    #[tokio::test]
    async fn index_serves_ui() {
        let app = build_router(test_state(CogitoConfig::default(), Arc::new(Scripted)));
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_string(resp).await;
        assert!(html.contains("thinking.start"));
        assert!(html.contains("starters.list"));
    }

    #[tokio::test]
    async fn chat_requires_token() {
        let mut config = CogitoConfig::default();
        config.gateway.auth.mode = AuthMode::Token;
        config.gateway.auth.token = Some("secret".to_string());
        let app = build_router(test_state(config, Arc::new(Scripted)));

        let resp = app
            .clone()
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer secret")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_streams_split_events_over_sse() {
        let mut config = CogitoConfig::default();
        config.gateway.auth.mode = AuthMode::None;
        let state = test_state(config, Arc::new(Scripted));
        let app = build_router(state.clone());

        let resp = app
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_string(resp).await;
        let start = body.find("thinking.start").unwrap();
        let end = body.find("thinking.end").unwrap();
        let done = body.find("answer.done").unwrap();
        assert!(start < end && end < done);
        assert!(body.contains("Thought for 0s"));
        assert!(body.contains("Hello there!"));
        assert!(body.contains("thread.title"));
    }

    #[test]
    fn cancel_turns_scopes_to_connection() {
        let state = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let a1 = state.register_turn("a", "1").unwrap();
        let a2 = state.register_turn("a", "2").unwrap();
        let b1 = state.register_turn("b", "1").unwrap();

        assert_eq!(state.cancel_turns("a", Some("2")), 1);
        assert!(a2.is_cancelled() && !a1.is_cancelled());

        assert_eq!(state.cancel_turns("a", None), 1);
        assert!(a1.is_cancelled() && !b1.is_cancelled());

        state.finish_turn("a", "1");
        state.finish_turn("a", "2");
        assert_eq!(state.active_turns.len(), 1);
    }

    #[test]
    fn reused_req_id_is_refused_while_running() {
        let state = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let first = state.register_turn("a", "1").unwrap();
        assert!(state.register_turn("a", "1").is_none());
        assert!(state.register_turn("b", "1").is_some());

        // a cancelled turn holds its id until the task finishes
        assert_eq!(state.cancel_turns("a", Some("1")), 1);
        assert!(first.is_cancelled());
        assert!(state.register_turn("a", "1").is_none());

        state.finish_turn("a", "1");
        assert!(state.register_turn("a", "1").is_some());
    }
}
