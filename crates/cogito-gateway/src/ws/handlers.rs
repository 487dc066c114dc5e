//! Concrete WS method handler functions.
//!
//! Each function extracts its parameters, calls the appropriate `AppState`
//! subsystem, and returns a `ResFrame`. `dispatch::route` is the only caller.

use serde_json::json;
use tracing::{info, warn};

use cogito_core::CogitoError;
use cogito_protocol::frames::{ReqFrame, ResFrame};
use cogito_protocol::methods::{
    ChatAbortParams, SettingsUpdateParams, ThreadParams, ThreadsListParams,
};

use crate::app::AppState;
use crate::turn::owned_thread;
use crate::ws::connection::Session;
use crate::ws::dispatch::error_res;

const DEFAULT_THREAD_LIMIT: usize = 20;
const MAX_THREAD_LIMIT: usize = 100;
/// Upper bound on messages returned by `threads.history`.
const MAX_HISTORY_MESSAGES: usize = 500;

fn parse<T: serde::de::DeserializeOwned>(req: &ReqFrame) -> Result<T, CogitoError> {
    req.parse_params()
        .map_err(|e| CogitoError::InvalidParams(e.to_string()))
}

// ---------------------------------------------------------------------------
// chat.abort
// ---------------------------------------------------------------------------

/// Params: `{ "req_id"?: string }`. Cancelling an unknown turn is not an error.
pub fn handle_chat_abort(conn_id: &str, req: &ReqFrame, app: &AppState) -> ResFrame {
    let params: ChatAbortParams = match parse(req) {
        Ok(p) => p,
        Err(e) => return error_res(&req.id, &e),
    };
    let cancelled = app.cancel_turns(conn_id, params.req_id.as_deref());
    info!(conn_id, cancelled, "chat.abort");
    ResFrame::ok(&req.id, json!({ "cancelled": cancelled }))
}

// ---------------------------------------------------------------------------
// threads.*
// ---------------------------------------------------------------------------

/// Params: `{ "limit"?: number }`. Newest threads first.
pub fn handle_threads_list(req: &ReqFrame, session: &Session, app: &AppState) -> ResFrame {
    let limit = match parse::<ThreadsListParams>(req) {
        Ok(p) => p
            .limit
            .map(|n| n.min(MAX_THREAD_LIMIT))
            .unwrap_or(DEFAULT_THREAD_LIMIT),
        Err(e) => return error_res(&req.id, &e),
    };

    match app.threads.list_for_user(&session.user.id, limit) {
        Ok(threads) => ResFrame::ok(&req.id, json!({ "threads": threads })),
        Err(e) => {
            warn!(error = %e, "threads.list failed");
            error_res(&req.id, &e.into())
        }
    }
}

/// Params: `{ "thread_id": string }`. Returns the thread and its messages,
/// oldest first, including stored thinking text.
pub fn handle_threads_history(req: &ReqFrame, session: &Session, app: &AppState) -> ResFrame {
    let result = parse::<ThreadParams>(req).and_then(|p| {
        let thread = owned_thread(app, &session.user.id, &p.thread_id)?;
        let messages = app.threads.history(&thread.id, MAX_HISTORY_MESSAGES)?;
        Ok(json!({ "thread": thread, "messages": messages }))
    });
    match result {
        Ok(payload) => ResFrame::ok(&req.id, payload),
        Err(e) => error_res(&req.id, &e),
    }
}

/// Params: `{ "thread_id": string }`.
pub fn handle_threads_delete(req: &ReqFrame, session: &Session, app: &AppState) -> ResFrame {
    let result = parse::<ThreadParams>(req).and_then(|p| {
        let thread = owned_thread(app, &session.user.id, &p.thread_id)?;
        app.threads.delete_thread(&thread.id)?;
        Ok(thread.id)
    });
    match result {
        Ok(thread_id) => {
            info!(thread_id = %thread_id, "thread deleted");
            ResFrame::ok(&req.id, json!({ "deleted": thread_id }))
        }
        Err(e) => error_res(&req.id, &e),
    }
}

// ---------------------------------------------------------------------------
// models.list / settings.update
// ---------------------------------------------------------------------------

pub fn handle_models_list(req: &ReqFrame, session: &Session, app: &AppState) -> ResFrame {
    ResFrame::ok(
        &req.id,
        json!({
            "models": app.registry.summaries(),
            "current": session.settings.model,
        }),
    )
}

/// Params: `{ "model"?: string, "temperature"?: number }`. Returns the
/// settings now in effect for this connection.
pub fn handle_settings_update(req: &ReqFrame, session: &mut Session, app: &AppState) -> ResFrame {
    let result = parse::<SettingsUpdateParams>(req)
        .and_then(|update| session.settings.apply(&update, &app.registry));
    match result {
        Ok(()) => {
            info!(
                model = %session.settings.model,
                temperature = session.settings.temperature,
                "settings updated"
            );
            ResFrame::ok(&req.id, &session.settings)
        }
        Err(e) => error_res(&req.id, &e),
    }
}

// ---------------------------------------------------------------------------
// starters.list
// ---------------------------------------------------------------------------

/// Conversation starters from `[[chat.starters]]`, incomplete entries skipped.
pub fn handle_starters_list(req: &ReqFrame, app: &AppState) -> ResFrame {
    ResFrame::ok(&req.id, json!({ "starters": app.config.chat.starters() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cogito_core::CogitoConfig;
    use cogito_threads::NewMessage;

    use crate::app::{test_state, testing::Scripted};
    use crate::session::{ChatSettings, SessionUser};
    use crate::ws::dispatch::route;

    fn session(app: &AppState, user_id: &str) -> Session {
        Session {
            user: SessionUser {
                id: user_id.to_string(),
                username: user_id.to_string(),
            },
            settings: ChatSettings::from_registry(&app.registry),
        }
    }

    fn req(method: &str, params: serde_json::Value) -> ReqFrame {
        ReqFrame::new("q1", method, Some(params))
    }

    #[test]
    fn history_is_scoped_to_owner() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let thread = app.threads.create_thread("alice").unwrap();
        app.threads
            .append_turn(
                &thread.id,
                &NewMessage::user("What is six times seven?"),
                &NewMessage::assistant("42").with_thinking("six times seven", Some(2)),
            )
            .unwrap();

        let mut alice = session(&app, "alice");
        let res = route(
            "c1",
            &req("threads.history", json!({ "thread_id": thread.id })),
            &mut alice,
            &app,
        );
        assert!(res.ok);
        let payload = res.payload.unwrap();
        assert_eq!(payload["messages"][1]["thinking"], "six times seven");

        let mut bob = session(&app, "bob");
        let res = route(
            "c2",
            &req("threads.history", json!({ "thread_id": thread.id })),
            &mut bob,
            &app,
        );
        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "NOT_FOUND");
    }

    #[test]
    fn list_and_delete() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let mut alice = session(&app, "alice");
        let thread = app.threads.create_thread("alice").unwrap();
        app.threads.create_thread("bob").unwrap();

        let res = route("c1", &req("threads.list", json!({})), &mut alice, &app);
        assert_eq!(res.payload.unwrap()["threads"].as_array().unwrap().len(), 1);

        let res = route(
            "c1",
            &req("threads.delete", json!({ "thread_id": thread.id })),
            &mut alice,
            &app,
        );
        assert!(res.ok);
        assert!(app.threads.get_thread(&thread.id).unwrap().is_none());
    }

    #[test]
    fn settings_update_changes_only_this_session() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let mut first = session(&app, "local");
        let second = session(&app, "local");

        let res = route(
            "c1",
            &req("settings.update", json!({ "model": "DeepSeek-R1", "temperature": 0.1 })),
            &mut first,
            &app,
        );
        assert!(res.ok);
        assert_eq!(first.settings.model, "DeepSeek-R1");
        assert_eq!(second.settings.model, "qwq-32b");

        let res = route(
            "c1",
            &req("settings.update", json!({ "model": "nope" })),
            &mut first,
            &app,
        );
        assert_eq!(res.error.unwrap().code, "INVALID_PARAMS");
    }

    #[test]
    fn models_list_and_unknown_method() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let mut s = session(&app, "local");

        let res = route("c1", &req("models.list", json!({})), &mut s, &app);
        let payload = res.payload.unwrap();
        assert_eq!(payload["current"], "qwq-32b");
        assert!(payload["models"][0].get("api_key").is_none());

        let res = route("c1", &req("memory.search", json!({})), &mut s, &app);
        assert_eq!(res.error.unwrap().code, "METHOD_NOT_FOUND");
    }

    #[test]
    fn starters_list_skips_incomplete_entries() {
        use cogito_core::config::Starter;

        let mut config = CogitoConfig::default();
        config.chat.starters = vec![
            Starter {
                label: "Plan a trip".to_string(),
                message: "Plan a three day trip to Kyoto.".to_string(),
                icon: None,
            },
            Starter {
                label: String::new(),
                message: "orphan".to_string(),
                icon: None,
            },
        ];
        let app = test_state(config, Arc::new(Scripted));
        let mut s = session(&app, "local");

        let res = route("c1", &req("starters.list", json!({})), &mut s, &app);
        let starters = res.payload.unwrap()["starters"].clone();
        assert_eq!(starters.as_array().unwrap().len(), 1);
        assert_eq!(starters[0]["label"], "Plan a trip");
        assert_eq!(starters[0]["message"], "Plan a three day trip to Kyoto.");
        assert!(starters[0].get("icon").is_none());
    }

    #[test]
    fn abort_cancels_registered_turn() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        let token = app.register_turn("c1", "r7").unwrap();
        let mut s = session(&app, "local");

        let res = route("c1", &req("chat.abort", json!({ "req_id": "r7" })), &mut s, &app);
        assert_eq!(res.payload.unwrap()["cancelled"], 1);
        assert!(token.is_cancelled());
    }
}
