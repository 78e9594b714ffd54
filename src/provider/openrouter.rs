//! OpenRouter provider (OpenAI-compatible).

use async_trait::async_trait;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::AssistantTurn;

use super::openai::OpenAiProvider;
use super::{require_api_key, ModelProvider, ProviderFactory, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    inner: OpenAiProvider,
}

impl OpenRouterProvider {
    pub fn new(model_id: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            inner: OpenAiProvider::new(
                model_id,
                api_key,
                Some(base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string())),
            )
            .renamed("openrouter"),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenRouterProvider {
    fn provider_name(&self) -> &str {
        "openrouter"
    }
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    async fn generate(&self, request: &ProviderRequest<'_>) -> Result<AssistantTurn, BridgeError> {
        self.inner.generate(request).await
    }
}

/// Factory for the `openrouter` provider key.
pub struct OpenRouterFactory;

impl ProviderFactory for OpenRouterFactory {
    fn provider_keys(&self) -> &[&str] {
        &["openrouter"]
    }

    fn create(
        &self,
        config: &BridgeConfig,
        _provider_key: &str,
        model_id: &str,
    ) -> Result<Box<dyn ModelProvider>, BridgeError> {
        let api_key = require_api_key(config, "openrouter", "Missing OPENROUTER_API_KEY")?;
        Ok(Box::new(OpenRouterProvider::new(
            model_id.to_string(),
            api_key,
            config.get_base_url("openrouter"),
        )))
    }
}
