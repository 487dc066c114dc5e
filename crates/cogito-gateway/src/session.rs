//! Per-connection identity and chat settings.

use serde::Serialize;

use cogito_agent::ModelRegistry;
use cogito_core::CogitoError;
use cogito_protocol::methods::SettingsUpdateParams;
use cogito_users::User;

/// Owner id for threads created without a password login (token/none auth, POST /chat).
pub const LOCAL_USER_ID: &str = "local";

const MAX_TEMPERATURE: f32 = 2.0;

/// Who is on the other end of a connection.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
}

impl SessionUser {
    pub fn local() -> Self {
        Self {
            id: LOCAL_USER_ID.to_string(),
            username: LOCAL_USER_ID.to_string(),
        }
    }
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
        }
    }
}

/// Model choice and temperature for one chat session.
///
/// Starts from the default profile; `settings.update` changes it for this
/// connection only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
}

impl ChatSettings {
    pub fn from_registry(registry: &ModelRegistry) -> Self {
        let entry = registry.default_entry();
        Self {
            model: entry.profile.id.clone(),
            temperature: entry.profile.temperature,
        }
    }

    /// Apply a partial update. Switching models resets the temperature to the
    /// new profile's default unless one is given in the same update.
    pub fn apply(
        &mut self,
        update: &SettingsUpdateParams,
        registry: &ModelRegistry,
    ) -> Result<(), CogitoError> {
        if let Some(t) = update.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(CogitoError::InvalidParams(format!(
                    "temperature must be between 0 and {MAX_TEMPERATURE}"
                )));
            }
        }

        if let Some(model) = update.model.as_deref() {
            if !registry.contains(model) {
                return Err(CogitoError::InvalidParams(format!("unknown model: {model}")));
            }
            if model != self.model {
                self.model = model.to_string();
                self.temperature = registry.get(model).profile.temperature;
            }
        }

        if let Some(t) = update.temperature {
            self.temperature = t;
        }
        Ok(())
    }
}
