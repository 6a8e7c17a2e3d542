//! Provider registry: routes `ProviderKind` to its adapter

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{AnthropicClient, OpenAiCompatibleClient, ProviderClient};
use crate::config::{Config, ProvidersConfig};
use crate::errors::Result;
use crate::types::{ProviderKind, ProviderMode};

/// Default per-call timeout when a provider has no configured value
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Entry {
    client: Arc<dyn ProviderClient>,
    timeout: Duration,
}

/// Set of available provider adapters with their call timeouts
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: HashMap<ProviderKind, Entry>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one of the same kind
    pub fn register(&mut self, client: Arc<dyn ProviderClient>, timeout: Duration) {
        let kind = client.kind();
        self.entries.insert(kind, Entry { client, timeout });
    }

    /// Builder form of `register` with the default timeout
    pub fn with(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.register(client, DEFAULT_TIMEOUT);
        self
    }

    /// Builder form of `register`
    pub fn with_timeout(mut self, client: Arc<dyn ProviderClient>, timeout: Duration) -> Self {
        self.register(client, timeout);
        self
    }

    /// Build adapters for every enabled provider whose API key is set
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_providers(&config.providers, |name| std::env::var(name).ok())
    }

    /// Same as `from_config` with an injectable key lookup
    pub fn from_providers<F>(providers: &ProvidersConfig, lookup_key: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();

        for kind in ProviderKind::ALL {
            let section = providers.get(kind);
            if !section.enabled {
                continue;
            }

            let Some(api_key) = lookup_key(&section.api_key_env).filter(|k| !k.is_empty()) else {
                warn!(
                    provider = %kind,
                    env = %section.api_key_env,
                    "API key not set; provider disabled"
                );
                continue;
            };

            let client: Arc<dyn ProviderClient> = match kind {
                ProviderKind::Anthropic => Arc::new(AnthropicClient::from_config(section, api_key)?),
                ProviderKind::OpenAi | ProviderKind::DeepSeek => {
                    Arc::new(OpenAiCompatibleClient::from_config(kind, section, api_key)?)
                }
            };
            registry.register(client, section.timeout());
        }

        info!(providers = ?registry.available(), "Provider registry ready");
        Ok(registry)
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderClient>> {
        self.entries.get(&kind).map(|e| Arc::clone(&e.client))
    }

    pub fn timeout(&self, kind: ProviderKind) -> Duration {
        self.entries
            .get(&kind)
            .map(|e| e.timeout)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered providers in default priority order
    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.entries.contains_key(k))
            .collect()
    }

    /// Providers a request in `mode` fans out to
    pub fn for_mode(&self, mode: ProviderMode) -> Vec<ProviderKind> {
        mode.providers(&self.available())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockProvider;

    #[test]
    fn test_register_and_route() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockProvider::answering(ProviderKind::Anthropic, "a")))
            .with_timeout(
                Arc::new(MockProvider::answering(ProviderKind::OpenAi, "o")),
                Duration::from_secs(5),
            );

        assert_eq!(
            registry.available(),
            vec![ProviderKind::OpenAi, ProviderKind::Anthropic]
        );
        assert_eq!(registry.timeout(ProviderKind::OpenAi), Duration::from_secs(5));
        assert_eq!(registry.timeout(ProviderKind::Anthropic), DEFAULT_TIMEOUT);
        assert_eq!(
            registry.for_mode(ProviderMode::Single(ProviderKind::Anthropic)),
            vec![ProviderKind::Anthropic]
        );
        assert!(registry
            .for_mode(ProviderMode::Single(ProviderKind::DeepSeek))
            .is_empty());
        assert!(registry.get(ProviderKind::DeepSeek).is_none());
    }

    #[test]
    fn test_from_providers_skips_missing_keys() {
        let providers = ProvidersConfig::default();
        let registry = ProviderRegistry::from_providers(&providers, |name| {
            (name == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(registry.available(), vec![ProviderKind::OpenAi]);
    }

    #[test]
    fn test_from_providers_respects_enabled() {
        let mut providers = ProvidersConfig::default();
        providers.deepseek.enabled = false;
        let registry =
            ProviderRegistry::from_providers(&providers, |_| Some("key".to_string())).unwrap();
        assert_eq!(
            registry.available(),
            vec![ProviderKind::OpenAi, ProviderKind::Anthropic]
        );
        assert_eq!(registry.len(), 2);
    }
}
