use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// Protocol constants. Bump PROTOCOL_VERSION on any breaking frame change
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // tick event cadence

pub const DEFAULT_THINK_OPEN: &str = "<think>";
pub const DEFAULT_THINK_CLOSE: &str = "</think>";

/// Top-level config (cogito.toml + COGITO_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogitoConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Selectable upstream model profiles. The first entry is the default.
    #[serde(default = "default_models")]
    pub models: Vec<ModelProfile>,
}

impl Default for CogitoConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            chat: ChatConfig::default(),
            models: default_models(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Shared secret for `token` mode (also accepted by `POST /chat`).
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Password,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Username + password checked against the users table.
    #[default]
    Password,
    /// Static bearer token from config.
    Token,
    /// No authentication. Local development only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// What to do with reasoning that shows up after the first thinking span closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReopenPolicy {
    /// One thinking span per response; later reasoning is discarded.
    #[default]
    Drop,
    /// Every new span opens a fresh thinking panel.
    Reopen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Number of prior messages replayed to the upstream model.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_think_open")]
    pub think_open: String,
    #[serde(default = "default_think_close")]
    pub think_close: String,
    #[serde(default)]
    pub reopen_policy: ReopenPolicy,
    /// Ask the model for a short thread title after the first turn.
    #[serde(default = "bool_true")]
    pub generate_titles: bool,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    /// Conversation starters offered on an empty chat (`[[chat.starters]]`).
    #[serde(default)]
    pub starters: Vec<Starter>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_limit: default_history_limit(),
            think_open: default_think_open(),
            think_close: default_think_close(),
            reopen_policy: ReopenPolicy::default(),
            generate_titles: true,
            title_max_chars: default_title_max_chars(),
            starters: Vec::new(),
        }
    }
}

/// A canned prompt shown on a new chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Starter {
    #[serde(default)]
    pub label: String,
    /// Text sent as the user message when the starter is picked.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ChatConfig {
    /// Starters with both a label and a message. Incomplete entries are
    /// logged and skipped.
    pub fn starters(&self) -> Vec<Starter> {
        self.starters
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                if s.label.trim().is_empty() || s.message.trim().is_empty() {
                    warn!(index = i, label = %s.label, "skipping chat starter without label or message");
                    None
                } else {
                    Some(s.clone())
                }
            })
            .collect()
    }
}

/// Wire dialect spoken by an upstream endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `POST /v1/chat/completions` with SSE streaming.
    #[default]
    OpenAi,
    /// `POST /api/v1/run/{flow_id}` with newline-delimited JSON events.
    Langflow,
}

/// One selectable upstream model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Label shown in the settings menu (e.g. "DeepSeek-R1").
    pub id: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier sent upstream. Falls back to `id` when unset.
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Inline API key. Prefer `api_key_env` outside of local setups.
    pub api_key: Option<String>,
    /// Name of an environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Langflow flow identifier (Langflow backend only).
    pub flow_id: Option<String>,
}

impl ModelProfile {
    /// Model name sent in the upstream request body.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }

    /// Inline key wins over the environment variable. Empty values count as absent.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .filter(|k| !k.trim().is_empty())
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_history_limit() -> usize {
    40
}
fn default_think_open() -> String {
    DEFAULT_THINK_OPEN.to_string()
}
fn default_think_close() -> String {
    DEFAULT_THINK_CLOSE.to_string()
}
fn default_title_max_chars() -> usize {
    60
}
fn default_temperature() -> f32 {
    0.7
}
fn default_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cogito/cogito.db", home)
}

/// Built-in profiles used when the config file declares none.
///
/// A Langflow profile is appended when `FLOW_ID` is present in the environment.
pub fn default_models() -> Vec<ModelProfile> {
    let openai = |id: &str, model: &str, key_env: &str| ModelProfile {
        id: id.to_string(),
        backend: Backend::OpenAi,
        base_url: default_base_url(),
        model: Some(model.to_string()),
        temperature: default_temperature(),
        api_key: None,
        api_key_env: Some(key_env.to_string()),
        flow_id: None,
    };

    let mut models = vec![
        openai("qwq-32b", "qwq-32b", "QWQ_API_KEY"),
        openai("DeepSeek-R1", "Pro/deepseek-ai/DeepSeek-R1", "DEEP_SEEK_API_KEY"),
        openai("DeepSeek-V3", "Pro/deepseek-ai/DeepSeek-V3", "DEEP_SEEK_API_KEY"),
    ];

    if let Ok(flow_id) = std::env::var("FLOW_ID") {
        models.push(ModelProfile {
            id: "langflow".to_string(),
            backend: Backend::Langflow,
            base_url: std::env::var("LANGFLOW_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:7860".to_string()),
            model: None,
            temperature: default_temperature(),
            api_key: None,
            api_key_env: Some("LANGFLOW_API_KEY".to_string()),
            flow_id: Some(flow_id),
        });
    }

    models
}

impl CogitoConfig {
    /// Load config from a TOML file with COGITO_* env var overrides.
    ///
    /// Nested keys use a double underscore: `COGITO_GATEWAY__PORT=9000`.
    /// A missing file is not an error; defaults fill the gaps.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CogitoConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COGITO_").split("__"))
            .extract()
            .map_err(|e| crate::error::CogitoError::Config(e.to_string()))?;

        debug!(
            path = %path,
            models = config.models.len(),
            starters = config.chat.starters.len(),
            "config loaded"
        );
        config.validate()?;
        Ok(config)
    }

    /// Hard errors only. Soft problems go through [`CogitoConfig::warnings`].
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.models.is_empty() {
            return Err(crate::error::CogitoError::Config(
                "at least one [[models]] entry is required".to_string(),
            ));
        }
        if self.chat.think_open.is_empty() || self.chat.think_close.is_empty() {
            return Err(crate::error::CogitoError::Config(
                "chat.think_open and chat.think_close must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-fatal configuration problems, logged once at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for profile in &self.models {
            if profile.resolved_api_key().is_none() {
                let hint = profile
                    .api_key_env
                    .as_deref()
                    .map(|v| format!(" (set api_key or ${v})"))
                    .unwrap_or_default();
                out.push(format!("model profile '{}' has no API key{hint}", profile.id));
            }
            if profile.backend == Backend::Langflow && profile.flow_id.is_none() {
                out.push(format!(
                    "model profile '{}' uses the langflow backend without a flow_id",
                    profile.id
                ));
            }
        }
        if self.gateway.auth.mode == AuthMode::Token && self.gateway.auth.token.is_none() {
            out.push("gateway.auth.mode is 'token' but no token is set".to_string());
        }
        out
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cogito/cogito.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = CogitoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.think_open, "<think>");
        assert_eq!(config.chat.think_close, "</think>");
        assert_eq!(config.chat.reopen_policy, ReopenPolicy::Drop);
        assert_eq!(config.gateway.auth.mode, AuthMode::Password);
        assert_eq!(config.models[0].id, "qwq-32b");
        assert!(config.chat.starters().is_empty());
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[gateway]
port = 9100

[chat]
history_limit = 10
reopen_policy = "reopen"

[[chat.starters]]
label = "Explain recursion"
message = "Explain recursion to a ten year old."
icon = "/public/learn.svg"

[[chat.starters]]
label = "Broken entry"

[[models]]
id = "local"
base_url = "http://127.0.0.1:1234"
model = "qwen3-8b"
temperature = 0.2
api_key = "sk-local"

[[models]]
id = "flow"
backend = "langflow"
base_url = "http://127.0.0.1:7860"
flow_id = "abc"
api_key = "lf-key"
"#
        )
        .unwrap();

        let config = CogitoConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.chat.reopen_policy, ReopenPolicy::Reopen);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].model_name(), "qwen3-8b");
        assert_eq!(config.models[1].backend, Backend::Langflow);
        assert!(config.warnings().is_empty());

        assert_eq!(config.chat.starters.len(), 2);
        let starters = config.chat.starters();
        assert_eq!(starters.len(), 1);
        assert_eq!(starters[0].label, "Explain recursion");
        assert_eq!(starters[0].icon.as_deref(), Some("/public/learn.svg"));
    }

    #[test]
    fn missing_api_key_is_a_warning_not_an_error() {
        let mut config = CogitoConfig::default();
        config.models = vec![ModelProfile {
            id: "bare".to_string(),
            backend: Backend::OpenAi,
            base_url: "http://localhost:8080".to_string(),
            model: None,
            temperature: 0.7,
            api_key: None,
            api_key_env: Some("COGITO_TEST_SURELY_UNSET_KEY".to_string()),
            flow_id: None,
        }];
        assert!(config.validate().is_ok());
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bare"));
        assert!(warnings[0].contains("COGITO_TEST_SURELY_UNSET_KEY"));
    }

    #[test]
    fn blank_inline_key_counts_as_missing() {
        let mut profile = CogitoConfig::default().models.remove(0);
        profile.api_key = Some("   ".to_string());
        profile.api_key_env = None;
        assert!(profile.resolved_api_key().is_none());
        assert_eq!(profile.model_name(), "qwq-32b");
    }

    #[test]
    fn empty_markers_are_rejected() {
        let mut config = CogitoConfig::default();
        config.chat.think_close.clear();
        assert!(config.validate().is_err());
    }
}
