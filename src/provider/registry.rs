//! Provider registry for dynamic provider resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::BridgeError;

use super::{ModelProvider, ProviderFactory};

/// Registry mapping provider keys to their factories.
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every provider compiled into this build.
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::openai::OpenAiFactory));
        #[cfg(feature = "openrouter")]
        registry.register(Arc::new(super::openrouter::OpenRouterFactory));
        registry
    }

    /// Register a factory for all provider keys it declares.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        for key in factory.provider_keys() {
            self.factories.insert(key.to_string(), factory.clone());
        }
    }

    /// Create a provider instance by looking up the registered factory.
    pub fn create_provider(
        &self,
        provider_key: &str,
        model_id: &str,
        config: &BridgeConfig,
    ) -> Result<Box<dyn ModelProvider>, BridgeError> {
        self.factories
            .get(provider_key)
            .ok_or_else(|| {
                BridgeError::ProviderNotFound(format!(
                    "No provider factory registered for '{provider_key}'"
                ))
            })?
            .create(config, provider_key, model_id)
    }

    /// Check whether a factory is registered for the given key.
    pub fn has_provider(&self, provider_key: &str) -> bool {
        self.factories.contains_key(provider_key)
    }

    /// List all registered provider keys.
    pub fn provider_keys(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
