//! Model-alias registry: resolves a client-facing model alias to a live
//! provider handle. Aliases whose key env var is unset at startup are
//! listed as unavailable rather than dropped, so MODEL_UNKNOWN and
//! "provider not configured" stay distinguishable.

use std::collections::BTreeMap;
use std::sync::Arc;

use fin_domain::config::{LlmConfig, ProviderKind};
use fin_domain::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    handles: BTreeMap<String, Arc<dyn LlmProvider>>,
    /// Aliases that exist in the table but could not be initialized.
    unavailable: BTreeMap<String, String>,
    default_alias: String,
    analysis_alias: String,
}

impl ProviderRegistry {
    /// Build a provider for every alias whose key env var is populated.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut handles: BTreeMap<String, Arc<dyn LlmProvider>> = BTreeMap::new();
        let mut unavailable = BTreeMap::new();

        for (name, alias) in &config.aliases {
            let built: Result<Arc<dyn LlmProvider>> = match alias.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_alias(name, alias).map(|p| Arc::new(p) as _)
                }
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_alias(name, alias).map(|p| Arc::new(p) as _)
                }
                ProviderKind::Google => {
                    GoogleProvider::from_alias(name, alias).map(|p| Arc::new(p) as _)
                }
            };
            match built {
                Ok(provider) => {
                    handles.insert(name.clone(), provider);
                }
                Err(e) => {
                    tracing::debug!(alias = %name, error = %e, "model alias unavailable");
                    unavailable.insert(name.clone(), e.to_string());
                }
            }
        }

        tracing::info!(
            available = handles.len(),
            unavailable = unavailable.len(),
            "provider registry ready"
        );

        Self {
            handles,
            unavailable,
            default_alias: config.default_alias.clone(),
            analysis_alias: config.analysis_alias.clone(),
        }
    }

    /// Resolve a model alias (or the default) to a provider handle.
    pub fn resolve(&self, alias: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        let name = alias.unwrap_or(&self.default_alias);
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }
        if let Some(reason) = self.unavailable.get(name) {
            return Err(Error::Upstream {
                provider: name.to_string(),
                message: format!("provider not configured: {reason}"),
            });
        }
        Err(Error::ModelUnknown(name.to_string()))
    }

    /// The small/cheap model the research operators run against, falling
    /// back to the default when the analysis alias has no key.
    pub fn resolve_analysis(&self) -> Result<Arc<dyn LlmProvider>> {
        self.resolve(Some(&self.analysis_alias))
            .or_else(|_| self.resolve(None))
    }

    /// Aliases with a live provider (the `/v1/models` listing).
    pub fn available_aliases(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Test-only: build a registry around preconstructed handles.
    pub fn from_handles(
        handles: BTreeMap<String, Arc<dyn LlmProvider>>,
        default_alias: &str,
    ) -> Self {
        Self {
            handles,
            unavailable: BTreeMap::new(),
            default_alias: default_alias.to_string(),
            analysis_alias: default_alias.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    fn registry_with_mock() -> ProviderRegistry {
        let mut handles: BTreeMap<String, Arc<dyn LlmProvider>> = BTreeMap::new();
        handles.insert(
            "gpt-4o".into(),
            Arc::new(ScriptedProvider::always("hi")) as Arc<dyn LlmProvider>,
        );
        ProviderRegistry::from_handles(handles, "gpt-4o")
    }

    #[test]
    fn resolves_default_alias() {
        let registry = registry_with_mock();
        assert!(registry.resolve(None).is_ok());
    }

    #[test]
    fn unknown_alias_is_model_unknown() {
        let registry = registry_with_mock();
        let err = match registry.resolve(Some("gpt-99")) {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail for unknown alias"),
        };
        assert!(matches!(err, Error::ModelUnknown(_)));
    }
}
