//! Model registry: maps configured model profiles to ready-to-use providers.
//!
//! Built once at startup and shared immutably. Sessions pick a profile by id;
//! unknown ids fall back to the first (default) profile.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use cogito_core::config::{Backend, CogitoConfig, ModelProfile};
use cogito_core::{CogitoError, Result};

use crate::langflow::LangflowProvider;
use crate::openai::OpenAiProvider;
use crate::provider::LlmProvider;

/// One selectable model and the provider that serves it.
#[derive(Clone)]
pub struct ModelEntry {
    pub profile: ModelProfile,
    pub provider: Arc<dyn LlmProvider>,
}

/// Public view of a profile for `models.list`. Never includes credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub backend: Backend,
    pub model: String,
    pub temperature: f32,
}

pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    /// At least one entry is required.
    pub fn new(entries: Vec<ModelEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(CogitoError::Config(
                "model registry needs at least one profile".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn from_config(config: &CogitoConfig) -> Result<Self> {
        let entries = config
            .models
            .iter()
            .map(|profile| {
                let provider = build_provider(profile);
                info!(
                    id = %profile.id,
                    provider = provider.name(),
                    base_url = %profile.base_url,
                    "model profile registered"
                );
                ModelEntry {
                    profile: profile.clone(),
                    provider,
                }
            })
            .collect();
        Self::new(entries)
    }

    /// Look up a profile by id, falling back to the default.
    pub fn get(&self, id: &str) -> &ModelEntry {
        self.entries
            .iter()
            .find(|e| e.profile.id == id)
            .unwrap_or(&self.entries[0])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.profile.id == id)
    }

    pub fn default_entry(&self) -> &ModelEntry {
        &self.entries[0]
    }

    pub fn summaries(&self) -> Vec<ModelSummary> {
        self.entries
            .iter()
            .map(|e| ModelSummary {
                id: e.profile.id.clone(),
                backend: e.profile.backend,
                model: e.profile.model_name().to_string(),
                temperature: e.profile.temperature,
            })
            .collect()
    }
}

/// Construct the provider for one profile.
pub fn build_provider(profile: &ModelProfile) -> Arc<dyn LlmProvider> {
    let api_key = profile.resolved_api_key();
    match profile.backend {
        Backend::OpenAi => Arc::new(OpenAiProvider::new(api_key, profile.base_url.clone())),
        Backend::Langflow => {
            let flow_id = profile
                .flow_id
                .clone()
                .unwrap_or_else(|| profile.model_name().to_string());
            Arc::new(LangflowProvider::new(
                api_key,
                profile.base_url.clone(),
                flow_id,
            ))
        }
    }
}
