//! Error types for toolbridge.

use thiserror::Error;

/// Primary error type for all toolbridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The model backend was unreachable or replied with something unusable.
    #[error("Generation failed ({provider}): {message}")]
    Generation { provider: String, message: String },

    /// The tool host answered a JSON-RPC request with an error object.
    #[error("Gateway error {code}: {message}")]
    Gateway { code: i64, message: String },

    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Interrupt {0} not found or expired")]
    InterruptNotFound(String),

    #[error("Interrupt {0} was already consumed")]
    InterruptAlreadyConsumed(String),

    #[error("Run canceled")]
    Canceled,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Generation,
    Gateway,
    Resume,
    Unknown,
}

impl BridgeError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a generation failure for the given provider.
    pub fn generation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::ConfigFile(_) | Self::ProviderNotFound(_) => {
                ErrorCategory::Configuration
            }
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Generation { .. } => ErrorCategory::Generation,
            Self::Gateway { .. } | Self::Protocol(_) => ErrorCategory::Gateway,
            Self::InterruptNotFound(_) | Self::InterruptAlreadyConsumed(_) => {
                ErrorCategory::Resume
            }
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable by a caller.
    ///
    /// Nothing inside the engine acts on this; it is advisory for front ends.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether this error belongs to the resume path (no loop was executed).
    pub fn is_resume_failure(&self) -> bool {
        self.category() == ErrorCategory::Resume
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_maps_to_category() {
        assert_eq!(BridgeError::api(401, "no").category(), ErrorCategory::Authentication);
        assert_eq!(BridgeError::api(429, "slow").category(), ErrorCategory::RateLimit);
        assert_eq!(BridgeError::api(503, "down").category(), ErrorCategory::Server);
        assert_eq!(BridgeError::api(400, "bad").category(), ErrorCategory::Api);
    }

    #[test]
    fn resume_failures_are_not_retryable() {
        let err = BridgeError::InterruptAlreadyConsumed("abc".into());
        assert!(err.is_resume_failure());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn timeouts_are_retryable() {
        assert!(BridgeError::Timeout(2_000).is_retryable());
        assert!(!BridgeError::generation("openai", "malformed").is_retryable());
    }
}
