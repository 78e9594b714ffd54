//! Model provider trait and implementations.

pub mod http;
pub mod registry;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "openrouter")]
pub mod openrouter;

pub use registry::ProviderRegistry;

use async_trait::async_trait;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::{AssistantTurn, Message, ToolSpec};

/// A request sent to a model provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub messages: &'a [Message],
    /// Tools the model may call this turn (already filtered for exposure).
    pub tools: &'a [ToolSpec],
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "openrouter").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Produce the next assistant turn for the conversation.
    async fn generate(&self, request: &ProviderRequest<'_>) -> Result<AssistantTurn, BridgeError>;
}

/// Factory that builds a provider for one or more provider keys.
pub trait ProviderFactory: Send + Sync {
    /// Keys this factory answers to (e.g. `["openai"]`).
    fn provider_keys(&self) -> &[&str];

    fn create(
        &self,
        config: &BridgeConfig,
        provider_key: &str,
        model_id: &str,
    ) -> Result<Box<dyn ModelProvider>, BridgeError>;
}

/// Resolve an API key from config or fail with an authentication error.
pub fn require_api_key(
    config: &BridgeConfig,
    provider: &str,
    missing_message: &str,
) -> Result<String, BridgeError> {
    config
        .get_api_key(provider)
        .ok_or_else(|| BridgeError::Authentication(missing_message.to_string()))
}

/// Create a provider by key using the built-in factories.
pub fn create_provider(
    provider_key: &str,
    model_id: &str,
    config: &BridgeConfig,
) -> Result<Box<dyn ModelProvider>, BridgeError> {
    ProviderRegistry::with_builtin().create_provider(provider_key, model_id, config)
}
