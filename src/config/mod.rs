//! Configuration system (layered: defaults < TOML file < environment).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default MCP gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8811/mcp";
/// MCP protocol revision announced during the handshake.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Runtime configuration for the engine and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub gateway_url: String,
    pub protocol_version: String,
    pub gateway_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub max_iterations: usize,
    pub interrupt_ttl_secs: u64,
    pub session_ttl_secs: u64,
    /// How often [`crate::engine::Engine::spawn_maintenance`] purges stale state.
    pub cleanup_interval_secs: u64,
    pub default_model: String,
    pub default_provider: String,
    pub api_keys: HashMap<String, String>,
    pub base_urls: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            gateway_timeout_secs: 60,
            generation_timeout_secs: 120,
            max_iterations: 10,
            interrupt_ttl_secs: 3_600,
            session_ttl_secs: 21_600,
            cleanup_interval_secs: 300,
            default_model: "gpt-5-mini".to_string(),
            default_provider: "openai".to_string(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Defaults overlaid with environment variables (`.env` is loaded if present).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Full layering: defaults, then the TOML file (if given), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognised environment variables onto this config.
    pub fn apply_env(&mut self) {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TOOLBRIDGE_GATEWAY_URL").or_else(|| lookup("MCP_GATEWAY_URL")) {
            self.gateway_url = url;
        }
        if let Some(version) = lookup("TOOLBRIDGE_PROTOCOL_VERSION") {
            self.protocol_version = version;
        }
        if let Some(model) = lookup("TOOLBRIDGE_DEFAULT_MODEL") {
            self.default_model = model;
        }
        if let Some(provider) = lookup("TOOLBRIDGE_DEFAULT_PROVIDER") {
            self.default_provider = provider;
        }

        let numeric = [
            ("TOOLBRIDGE_GATEWAY_TIMEOUT_SECS", &mut self.gateway_timeout_secs),
            ("TOOLBRIDGE_GENERATION_TIMEOUT_SECS", &mut self.generation_timeout_secs),
            ("TOOLBRIDGE_INTERRUPT_TTL_SECS", &mut self.interrupt_ttl_secs),
            ("TOOLBRIDGE_SESSION_TTL_SECS", &mut self.session_ttl_secs),
            ("TOOLBRIDGE_CLEANUP_INTERVAL_SECS", &mut self.cleanup_interval_secs),
        ];
        for (var, slot) in numeric {
            if let Some(value) = lookup(var) {
                match value.parse() {
                    Ok(parsed) => *slot = parsed,
                    Err(_) => tracing::warn!(var, value, "ignoring non-numeric override"),
                }
            }
        }
        if let Some(value) = lookup("TOOLBRIDGE_MAX_ITERATIONS") {
            match value.parse() {
                Ok(parsed) => self.max_iterations = parsed,
                Err(_) => tracing::warn!(value, "ignoring non-numeric TOOLBRIDGE_MAX_ITERATIONS"),
            }
        }

        let key_mappings = [
            ("OPENAI_API_KEY", "openai"),
            ("OPENROUTER_API_KEY", "openrouter"),
        ];
        for (var, provider) in key_mappings {
            if let Some(key) = lookup(var) {
                self.set_api_key(provider, key);
            }
        }

        let url_mappings = [
            ("OPENAI_BASE_URL", "openai"),
            ("OPENROUTER_BASE_URL", "openrouter"),
        ];
        for (var, provider) in url_mappings {
            if let Some(url) = lookup(var) {
                self.set_base_url(provider, url);
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(BridgeError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(BridgeError::Configuration(
                "cleanup_interval_secs must be at least 1".into(),
            ));
        }
        if self.gateway_url.trim().is_empty() {
            return Err(BridgeError::Configuration("gateway_url is empty".into()));
        }
        Ok(())
    }

    pub fn set_api_key(&mut self, provider: &str, key: String) {
        self.api_keys.insert(provider.to_string(), key);
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.get(provider).cloned()
    }

    pub fn set_base_url(&mut self, provider: &str, url: String) {
        self.base_urls.insert(provider.to_string(), url);
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.get(provider).cloned()
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn interrupt_ttl(&self) -> Duration {
        Duration::from_secs(self.interrupt_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
