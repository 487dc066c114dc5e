use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use cogito_core::config::{HANDSHAKE_TIMEOUT_MS, HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES};
use cogito_core::types::ConnId;
use cogito_protocol::events::TICK;
use cogito_protocol::frames::EventFrame;

use crate::app::AppState;
use crate::session::{ChatSettings, SessionUser};
use crate::ws::{message, send};

/// Authenticated connection context. Settings live here, so every
/// connection chooses its model independently.
pub struct Session {
    pub user: SessionUser,
    pub settings: ChatSettings,
}

/// WS connection states, linear progression, no backwards transitions.
pub enum ConnState {
    AwaitingConnect,
    Authenticated(Session),
    Closing,
}

/// Axum handler, upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection event loop, lives for the entire WS session.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = ConnId::new().to_string();
    state.ws_connections.fetch_add(1, Ordering::Relaxed);
    info!(conn_id = %conn_id, "new WS connection");

    let (tx, mut rx) = socket.split();
    let shared_tx: send::SharedSink = Arc::new(tokio::sync::Mutex::new(tx));

    // send challenge and enter AwaitingConnect state
    let nonce = crate::ws::handshake::make_nonce();
    let challenge = crate::ws::handshake::challenge_event(&nonce);
    let challenged = {
        let mut guard = shared_tx.lock().await;
        guard.send(Message::Text(challenge.into())).await.is_ok()
    };
    let mut conn_state = if challenged {
        ConnState::AwaitingConnect
    } else {
        ConnState::Closing
    };

    // handshake must complete within 10s
    let deadline =
        tokio::time::Instant::now() + std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(deadline));

    // heartbeat tick after auth
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !matches!(conn_state, ConnState::Closing) {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large");
                            break;
                        }
                        conn_state = message::handle(
                            &conn_id, text.as_str(), conn_state, &shared_tx, &state,
                        ).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let mut guard = shared_tx.lock().await;
                        let _ = guard.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "WS read failed");
                        break;
                    }
                    _ => {}
                }
            }

            _ = tick.tick() => {
                if matches!(conn_state, ConnState::Authenticated(_)) {
                    let seq = state.next_seq();
                    let ev = EventFrame::new(
                        TICK,
                        serde_json::json!({ "ts": chrono::Utc::now().timestamp_millis() }),
                    ).with_seq(seq);
                    if send::json_shared(&shared_tx, &ev).await.is_err() {
                        break;
                    }
                }
            }

            _ = &mut handshake_timer, if matches!(conn_state, ConnState::AwaitingConnect) => {
                warn!(conn_id, "handshake timeout");
                break;
            }
        }
    }

    let cancelled = state.cancel_turns(&conn_id, None);
    state.ws_connections.fetch_sub(1, Ordering::Relaxed);
    info!(conn_id, cancelled_turns = cancelled, "WS connection closed");
}
