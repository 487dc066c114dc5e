use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cogito_core::CogitoError;
use cogito_protocol::frames::{ReqFrame, ResFrame};
use cogito_protocol::methods::{
    ChatSendParams, CHAT_ABORT, CONNECT, MODELS_LIST, PING, SETTINGS_GET, SETTINGS_UPDATE,
    STARTERS_LIST, THREADS_DELETE, THREADS_HISTORY, THREADS_LIST,
};

use crate::app::AppState;
use crate::turn::{self, ChatTurn, FrameOut};
use crate::ws::connection::Session;
use crate::ws::{handlers, send};

/// Route a post-handshake WS method call to its handler.
///
/// `chat.send` does not come through here: it streams, so `message.rs`
/// hands it to [`handle_chat_send`].
pub fn route(conn_id: &str, req: &ReqFrame, session: &mut Session, app: &AppState) -> ResFrame {
    match req.method.as_str() {
        PING => ResFrame::ok(&req.id, serde_json::json!({ "pong": true })),

        CHAT_ABORT => handlers::handle_chat_abort(conn_id, req, app),

        THREADS_LIST => handlers::handle_threads_list(req, session, app),
        THREADS_HISTORY => handlers::handle_threads_history(req, session, app),
        THREADS_DELETE => handlers::handle_threads_delete(req, session, app),

        MODELS_LIST => handlers::handle_models_list(req, session, app),
        SETTINGS_GET => ResFrame::ok(&req.id, &session.settings),
        SETTINGS_UPDATE => handlers::handle_settings_update(req, session, app),

        STARTERS_LIST => handlers::handle_starters_list(req, app),

        CONNECT => ResFrame::err(&req.id, "PROTOCOL_ERROR", "already authenticated"),

        other => error_res(
            &req.id,
            &CogitoError::MethodNotFound {
                method: other.to_string(),
            },
        ),
    }
}

/// `RES` error frame carrying the error's stable code.
pub fn error_res(req_id: &str, e: &CogitoError) -> ResFrame {
    ResFrame::err(req_id, e.code(), &e.to_string())
}

/// Handle `chat.send`: validate, resolve the thread, acknowledge with the
/// thread id, then stream the turn from a background task.
///
/// Params: `{ "text": string, "thread_id"?: string }`
pub async fn handle_chat_send(
    conn_id: &str,
    req: &ReqFrame,
    session: &Session,
    tx: &send::SharedSink,
    app: &Arc<AppState>,
) {
    let res = match claim_turn(conn_id, req, session, app) {
        Ok((turn, cancel)) => {
            let ack = ResFrame::ok(
                &req.id,
                serde_json::json!({ "req_id": req.id, "thread_id": turn.thread_id }),
            );
            // ack goes out before the first streamed event
            let _ = send::json_shared(tx, &ack).await;
            spawn_turn(conn_id, turn, cancel, tx, app);
            return;
        }
        Err(e) => error_res(&req.id, &e),
    };
    warn!(conn_id, req_id = %req.id, error = ?res.error, "chat.send rejected");
    let _ = send::json_shared(tx, &res).await;
}

/// Reserve `req.id` on this connection, then build the turn. The
/// reservation is released again if the request is invalid.
fn claim_turn(
    conn_id: &str,
    req: &ReqFrame,
    session: &Session,
    app: &AppState,
) -> Result<(ChatTurn, CancellationToken), CogitoError> {
    let cancel = app.register_turn(conn_id, &req.id).ok_or_else(|| {
        CogitoError::InvalidParams(format!("request id {} is already running", req.id))
    })?;
    match prepare_turn(req, session, app) {
        Ok(turn) => Ok((turn, cancel)),
        Err(e) => {
            app.finish_turn(conn_id, &req.id);
            Err(e)
        }
    }
}

fn prepare_turn(
    req: &ReqFrame,
    session: &Session,
    app: &AppState,
) -> Result<ChatTurn, CogitoError> {
    let params: ChatSendParams = req
        .parse_params()
        .map_err(|e| CogitoError::InvalidParams(e.to_string()))?;
    if params.text.trim().is_empty() {
        return Err(CogitoError::InvalidParams("text cannot be empty".to_string()));
    }

    let thread_id = turn::resolve_thread(app, &session.user.id, params.thread_id.as_deref())?;
    Ok(ChatTurn {
        req_id: req.id.clone(),
        user_id: session.user.id.clone(),
        thread_id,
        text: params.text,
        settings: session.settings.clone(),
    })
}

fn spawn_turn(
    conn_id: &str,
    turn: ChatTurn,
    cancel: CancellationToken,
    tx: &send::SharedSink,
    app: &Arc<AppState>,
) {
    let out: Arc<dyn FrameOut> = Arc::new(tx.clone());
    let app = Arc::clone(app);
    let conn_id = conn_id.to_string();
    let req_id = turn.req_id.clone();

    info!(conn_id = %conn_id, req_id = %req_id, thread_id = %turn.thread_id, "chat.send accepted");
    tokio::spawn(async move {
        let _ = turn::run_turn(Arc::clone(&app), turn, out, cancel).await;
        app.finish_turn(&conn_id, &req_id);
    });
}
