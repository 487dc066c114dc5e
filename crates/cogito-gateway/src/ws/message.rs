use std::sync::Arc;

use tracing::{info, warn};

use cogito_protocol::{
    frames::{InboundFrame, ResFrame},
    handshake::ConnectParams,
    methods::{CHAT_SEND, CONNECT},
};

use crate::app::AppState;
use crate::session::{ChatSettings, SessionUser};
use crate::ws::connection::{ConnState, Session};
use crate::ws::{dispatch, handshake, send};

/// Process one inbound WS text frame. Returns the new connection state.
pub async fn handle(
    conn_id: &str,
    text: &str,
    state: ConnState,
    tx: &send::SharedSink,
    app: &Arc<AppState>,
) -> ConnState {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame");
            return state;
        }
    };

    match state {
        ConnState::AwaitingConnect => handle_auth(conn_id, frame, tx, app).await,
        ConnState::Authenticated(session) => handle_method(conn_id, frame, session, tx, app).await,
        ConnState::Closing => ConnState::Closing,
    }
}

/// Pre-auth: only `connect` method is accepted.
async fn handle_auth(
    conn_id: &str,
    frame: InboundFrame,
    tx: &send::SharedSink,
    app: &Arc<AppState>,
) -> ConnState {
    let Some(req) = frame.as_req() else {
        return ConnState::AwaitingConnect;
    };

    if req.method != CONNECT {
        let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "must authenticate first");
        let _ = send::json_shared(tx, &res).await;
        return ConnState::AwaitingConnect;
    }

    let params: ConnectParams = match req.parse_params() {
        Ok(p) => p,
        Err(_) => {
            let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "invalid connect params");
            let _ = send::json_shared(tx, &res).await;
            return ConnState::Closing;
        }
    };

    match handshake::verify_auth(&params, app).await {
        Ok(user) => {
            let hello = handshake::hello_ok_payload(user.as_ref(), &app.config);
            let res = ResFrame::ok(&req.id, hello);
            let _ = send::json_shared(tx, &res).await;

            let session_user = user
                .as_ref()
                .map(SessionUser::from)
                .unwrap_or_else(SessionUser::local);
            info!(conn_id, user = %session_user.username, "client authenticated");
            ConnState::Authenticated(Session {
                user: session_user,
                settings: ChatSettings::from_registry(&app.registry),
            })
        }
        Err(reason) => {
            warn!(conn_id, %reason, "auth failed");
            let res = ResFrame::err(&req.id, "AUTH_FAILED", &reason);
            let _ = send::json_shared(tx, &res).await;
            ConnState::Closing
        }
    }
}

/// Post-auth: `chat.send` starts a background turn, everything else is
/// answered inline.
async fn handle_method(
    conn_id: &str,
    frame: InboundFrame,
    mut session: Session,
    tx: &send::SharedSink,
    app: &Arc<AppState>,
) -> ConnState {
    if let Some(req) = frame.as_req() {
        if req.method == CHAT_SEND {
            dispatch::handle_chat_send(conn_id, &req, &session, tx, app).await;
        } else {
            let res = dispatch::route(conn_id, &req, &mut session, app);
            let _ = send::json_shared(tx, &res).await;
        }
    }
    ConnState::Authenticated(session)
}
