//! Model selection: picks the model a session talks to.
//!
//! Rule, applied to the provider's list in the order it was returned:
//!
//! 1. keep models declaring the generation capability;
//! 2. the first one whose id contains the fast-tier marker wins;
//! 3. otherwise the first generation-capable model wins;
//! 4. if discovery fails or nothing qualifies, use the fallback id.
//!
//! Discovery failures are never surfaced to the user: a broken listing
//! endpoint must not stop someone from chatting. They are logged and the
//! fallback is used.

use physiogold_config::ProviderSettings;
use physiogold_core::provider::{ModelDescriptor, ModelId, Provider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Where a selected model id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Discovered,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub model: ModelId,
    pub source: SelectionSource,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    capability: String,
    fast_tier_marker: String,
    fallback: ModelId,
}

impl ModelSelector {
    pub fn new(
        capability: impl Into<String>,
        fast_tier_marker: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            capability: capability.into(),
            fast_tier_marker: fast_tier_marker.into(),
            fallback: ModelId::new(fallback),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(
            &settings.generation_capability,
            &settings.fast_tier_marker,
            &settings.fallback_model,
        )
    }

    pub fn fallback(&self) -> &ModelId {
        &self.fallback
    }

    /// Apply the preference rule to an already fetched list.
    pub fn choose(&self, models: &[ModelDescriptor]) -> Option<ModelId> {
        let capable: Vec<&ModelDescriptor> = models
            .iter()
            .filter(|m| m.supports(&self.capability))
            .collect();

        capable
            .iter()
            .find(|m| m.id.contains(&self.fast_tier_marker))
            .or_else(|| capable.first())
            .map(|m| ModelId::new(&m.id))
    }

    /// Query the provider and pick a model. Never fails.
    pub async fn select(&self, provider: &dyn Provider) -> Selection {
        let discovered = match provider.list_models().await {
            Ok(models) => self.choose(&models),
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    error = %e,
                    "Model discovery failed, using fallback"
                );
                None
            }
        };

        let selection = match discovered {
            Some(model) => Selection {
                model,
                source: SelectionSource::Discovered,
            },
            None => Selection {
                model: self.fallback.clone(),
                source: SelectionSource::Fallback,
            },
        };

        info!(model = %selection.model, source = ?selection.source, "Model selected");
        selection
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}
