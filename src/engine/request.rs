//! Request payloads accepted by the engine.

use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::registry::Mode;
use crate::types::Conversation;

/// Start a run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub messages: Conversation,
    /// Defaults to the configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub model: Option<String>,
    /// Defaults to the configured provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub provider: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub mode: Mode,
    /// Servers to activate before the first generation.
    #[serde(default, alias = "inital_servers")]
    #[builder(default)]
    pub initial_servers: Vec<String>,
    /// Defaults to the configured iteration limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

/// Continue a suspended run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct ResumeRequest {
    #[builder(into)]
    pub interrupt_id: String,
    #[serde(default)]
    #[builder(default)]
    pub provided_configs: BTreeMap<String, serde_json::Value>,
    /// Overrides the model recorded with the interrupt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub provider: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_accepts_legacy_initial_servers_key() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "mode": "code",
            "inital_servers": ["wikipedia"]
        }))
        .unwrap();
        assert_eq!(request.mode, Mode::Code);
        assert_eq!(request.initial_servers, vec!["wikipedia".to_string()]);
        assert_eq!(request.max_iterations, None);
    }

    #[test]
    fn builder_fills_defaults() {
        let request = ChatRequest::builder().messages(vec![]).model("gpt-5-mini").build();
        assert_eq!(request.mode, Mode::Dynamic);
        assert!(request.initial_servers.is_empty());
        assert_eq!(request.model.as_deref(), Some("gpt-5-mini"));

        let resume = ResumeRequest::builder().interrupt_id("abc").build();
        assert!(resume.provided_configs.is_empty());
    }
}
