//! Scripting chat endpoint: `POST /chat`.
//!
//! Streams the same events the WebSocket carries, as Server-Sent Events, so
//! a turn can be watched with plain `curl -N`.
//!
//! Auth: `Authorization: Bearer <token>` (the gateway token). Open when the
//! gateway runs with `auth.mode = "none"`.
//!
//! Request: `{"text": "hello", "thread_id"?: "...", "model"?: "...", "temperature"?: 0.7}`
//! Events:  `thinking.start`, `thinking.delta`, `thinking.end`, `answer.delta`,
//!          `answer.done` | `answer.error`, then `thread.title` on a new thread.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cogito_core::config::AuthMode;
use cogito_core::CogitoError;
use cogito_protocol::frames::EventFrame;
use cogito_protocol::methods::SettingsUpdateParams;

use crate::app::AppState;
use crate::session::{ChatSettings, SessionUser};
use crate::turn::{self, ChatTurn, FrameOut};

const EVENT_BUFFER: usize = 64;

#[derive(Deserialize)]
pub struct ChatBody {
    pub text: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Serialize)]
pub struct ChatError {
    pub error: String,
}

type ChatRejection = (StatusCode, Json<ChatError>);

fn reject(status: StatusCode, error: impl Into<String>) -> ChatRejection {
    (
        status,
        Json(ChatError {
            error: error.into(),
        }),
    )
}

/// POST /chat, one turn streamed as SSE. Dropping the connection cancels it.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatRejection> {
    if !check_auth(&state, &headers) {
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "Unauthorized. Set 'Authorization: Bearer <your-token>' header.",
        ));
    }

    if body.text.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "text cannot be empty"));
    }

    let mut settings = ChatSettings::from_registry(&state.registry);
    let update = SettingsUpdateParams {
        model: body.model.clone(),
        temperature: body.temperature,
    };
    if let Err(e) = settings.apply(&update, &state.registry) {
        return Err(reject(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let user = SessionUser::local();
    let thread_id = turn::resolve_thread(&state, &user.id, body.thread_id.as_deref())
        .map_err(|e| match e {
            CogitoError::NotFound { .. } => reject(StatusCode::NOT_FOUND, e.to_string()),
            other => {
                warn!(error = %other, "POST /chat thread lookup failed");
                reject(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        })?;

    let req_id = uuid::Uuid::new_v4().to_string();
    info!(req_id = %req_id, thread_id = %thread_id, model = %settings.model, "POST /chat");

    let chat_turn = ChatTurn {
        req_id,
        user_id: user.id,
        thread_id,
        text: body.text,
        settings,
    };

    let (tx, mut rx) = mpsc::channel::<EventFrame>(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let out: Arc<dyn FrameOut> = Arc::new(tx);
    tokio::spawn(turn::run_turn(state, chat_turn, out, cancel));

    let stream = async_stream::stream! {
        // client disconnect drops the stream, and with it the guard
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(to_sse(&frame));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(frame: &EventFrame) -> Event {
    let data = frame
        .payload
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "null".to_string());
    Event::default().event(frame.event.as_str()).data(data)
}

/// Returns true if the request is authorised.
fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config.gateway.auth.mode == AuthMode::None {
        return true;
    }
    // Password accounts sign in over the WebSocket; this endpoint only
    // knows the shared gateway token.
    match &state.config.gateway.auth.token {
        Some(expected) => extract_bearer(headers)
            .map(|t| t == expected)
            .unwrap_or(false),
        None => false,
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
