//! Normalized results of a tool invocation.

use serde::{Deserialize, Serialize};

/// One configuration value a server needs before it can run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigRequirement {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl ConfigRequirement {
    pub fn new(
        key: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// What a tool call produced, after gateway normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
    ConfigRequired {
        server: String,
        required_configs: Vec<ConfigRequirement>,
        instructions: String,
    },
}

impl ToolOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::Success { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_config_required(&self) -> bool {
        matches!(self, Self::ConfigRequired { .. })
    }

    /// Short tag used on `tool_result` events.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::ConfigRequired { .. } => "config_required",
        }
    }

    /// Text placed in the tool message the model reads.
    pub fn to_message_content(&self) -> String {
        match self {
            Self::Success { payload } => match payload {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            Self::Error { message } => format!("Error: {message}"),
            Self::ConfigRequired {
                server,
                required_configs,
                ..
            } => {
                let keys: Vec<&str> = required_configs.iter().map(|c| c.key.as_str()).collect();
                format!(
                    "Server '{server}' needs configuration before it can run: {}",
                    keys.join(", ")
                )
            }
        }
    }
}
