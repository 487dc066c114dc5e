use std::sync::Arc;

use cogito_core::config::{AuthMode, CogitoConfig, MAX_PAYLOAD_BYTES, PROTOCOL_VERSION};
use cogito_protocol::{
    events::CONNECT_CHALLENGE,
    frames::EventFrame,
    handshake::{
        AuthPayload, ClientPolicy, ConnectChallenge, ConnectParams, HelloOk, HelloUser,
        ServerFeatures, ServerInfo,
    },
};
use cogito_users::User;
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;

/// Random nonce for the connect challenge.
pub fn make_nonce() -> String {
    Uuid::new_v4().to_string().replace('-', "")
}

/// Serialize the `connect.challenge` event that opens every WS session.
pub fn challenge_event(nonce: &str) -> String {
    let frame = EventFrame::new(
        CONNECT_CHALLENGE,
        ConnectChallenge {
            nonce: nonce.to_string(),
        },
    );
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Verify client auth against the configured mode.
///
/// Password mode returns the signed-in account; token and none modes
/// return `Ok(None)` and the session runs as the local user. The argon2
/// check runs on the blocking pool.
pub async fn verify_auth(
    params: &ConnectParams,
    app: &Arc<AppState>,
) -> Result<Option<User>, String> {
    match &app.config.gateway.auth.mode {
        AuthMode::None => Ok(None),

        AuthMode::Token => match &params.auth {
            AuthPayload::Token { token } => {
                if Some(token) == app.config.gateway.auth.token.as_ref() {
                    Ok(None)
                } else {
                    Err("invalid token".to_string())
                }
            }
            _ => Err("expected token auth mode".to_string()),
        },

        AuthMode::Password => match &params.auth {
            AuthPayload::Password { username, password } => {
                let app = Arc::clone(app);
                let username = username.clone();
                let password = password.clone();
                let checked =
                    tokio::task::spawn_blocking(move || app.users.authenticate(&username, &password))
                        .await;
                match checked {
                    Ok(Ok(Some(user))) => Ok(Some(user)),
                    Ok(Ok(None)) => Err("invalid username or password".to_string()),
                    Ok(Err(e)) => {
                        warn!(error = %e, "user lookup failed during connect");
                        Err("authentication unavailable".to_string())
                    }
                    Err(e) => {
                        warn!(error = %e, "password check task failed");
                        Err("authentication unavailable".to_string())
                    }
                }
            }
            _ => Err("expected password auth mode".to_string()),
        },
    }
}

/// Build the `hello-ok` response payload after successful authentication.
pub fn hello_ok_payload(user: Option<&User>, config: &CogitoConfig) -> HelloOk {
    HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            name: "cogito".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        user: user.map(|u| HelloUser {
            id: u.id.clone(),
            username: u.username.clone(),
            role: u.role.to_string(),
        }),
        features: ServerFeatures {
            streaming: true,
            thinking_split: true,
            threads: true,
            titles: config.chat.generate_titles,
        },
        policy: ClientPolicy {
            max_message_size: MAX_PAYLOAD_BYTES,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{test_state, testing::Scripted};
    use cogito_core::types::UserRole;

    fn password(username: &str, password: &str) -> ConnectParams {
        ConnectParams {
            auth: AuthPayload::Password {
                username: username.to_string(),
                password: password.to_string(),
            },
            client_info: None,
        }
    }

    #[tokio::test]
    async fn password_mode_checks_user_store() {
        let app = test_state(CogitoConfig::default(), Arc::new(Scripted));
        app.users
            .create_or_update("ada", "lovelace", UserRole::User)
            .unwrap();

        let user = verify_auth(&password("ada", "lovelace"), &app)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.username, "ada");
        assert!(verify_auth(&password("ada", "babbage"), &app).await.is_err());
        assert!(verify_auth(&password("grace", "lovelace"), &app).await.is_err());

        let token = ConnectParams {
            auth: AuthPayload::Token {
                token: "x".to_string(),
            },
            client_info: None,
        };
        assert!(verify_auth(&token, &app).await.is_err());
    }

    #[tokio::test]
    async fn token_mode_compares_configured_token() {
        let mut config = CogitoConfig::default();
        config.gateway.auth.mode = AuthMode::Token;
        config.gateway.auth.token = Some("t0k".to_string());
        let app = test_state(config, Arc::new(Scripted));

        let ok = ConnectParams {
            auth: AuthPayload::Token {
                token: "t0k".to_string(),
            },
            client_info: None,
        };
        assert!(verify_auth(&ok, &app).await.unwrap().is_none());
        assert!(verify_auth(&password("ada", "t0k"), &app).await.is_err());
    }

    #[test]
    fn hello_ok_carries_user_only_when_signed_in() {
        let config = CogitoConfig::default();
        let anon = serde_json::to_value(hello_ok_payload(None, &config)).unwrap();
        assert!(anon.get("user").is_none());
        assert_eq!(anon["features"]["thinking_split"], true);
        assert_eq!(anon["protocol"], PROTOCOL_VERSION);

        let challenge: serde_json::Value =
            serde_json::from_str(&challenge_event(&make_nonce())).unwrap();
        assert_eq!(challenge["event"], "connect.challenge");
        assert_eq!(challenge["payload"]["nonce"].as_str().unwrap().len(), 32);
    }
}
