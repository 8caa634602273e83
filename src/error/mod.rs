//! Error types for parley.

pub mod category;

pub use category::ErrorCategory;

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Primary error type for all turn-engine operations.
#[derive(Error, Debug)]
pub enum ParleyError {
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

    #[error("Stream error: {0}")]
    Stream(String),

    /// The model asked for a tool that is not part of the current toolset.
    #[error("Tool {tool_name} not found: {message}")]
    ToolNotFound { tool_name: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The user canceled the turn. Never surfaced as an `error` event.
    #[error("Turn aborted by user")]
    Aborted,
}

fn tool_not_found_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?i)tool\s+[`'"]?([A-Za-z0-9_.:\-]+)[`'"]?\s+(?:not found|does not exist)"#)
                .ok()
        })
        .as_ref()
}

impl ParleyError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool-not-found error.
    pub fn tool_not_found(tool_name: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        Self::ToolNotFound {
            message: format!("requested tool '{tool_name}' does not exist"),
            tool_name,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        if self.hallucinated_tool().is_some() {
            return ErrorCategory::HallucinatedTool;
        }
        match self {
            Self::Aborted => ErrorCategory::Abort,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) | Self::Stream(_) => ErrorCategory::Transport,
            Self::Configuration(_) | Self::ConfigFile(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Provider,
            },
            Self::InvalidState(_) => ErrorCategory::InvalidState,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether the user canceled the turn.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Name of the tool the model hallucinated, if this error reports one.
    ///
    /// Runtimes that surface the condition as an opaque message
    /// (`Tool foo not found in agent bar`) are recognized too.
    pub fn hallucinated_tool(&self) -> Option<String> {
        match self {
            Self::ToolNotFound { tool_name, .. } => Some(tool_name.clone()),
            Self::Runtime(message) | Self::Stream(message) => tool_not_found_pattern()?
                .captures(message)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hallucinated_tool_is_recognized_from_runtime_messages() {
        let err = ParleyError::Runtime("Tool read_fiel not found in agent Assistant".into());
        assert_eq!(err.hallucinated_tool().as_deref(), Some("read_fiel"));
        assert_eq!(err.category(), ErrorCategory::HallucinatedTool);

        let err = ParleyError::Stream("model requested tool `web` which does not exist".into());
        assert_eq!(err.hallucinated_tool(), None);
    }

    #[test]
    fn abort_is_its_own_category() {
        assert!(ParleyError::Aborted.is_abort());
        assert_eq!(ParleyError::Aborted.category(), ErrorCategory::Abort);
        assert!(!ParleyError::Runtime("boom".into()).is_abort());
    }

    #[test]
    fn api_status_maps_to_category() {
        assert_eq!(ParleyError::api(401, "no").category(), ErrorCategory::Authentication);
        assert_eq!(ParleyError::api(503, "down").category(), ErrorCategory::Server);
        assert_eq!(ParleyError::api(400, "bad").category(), ErrorCategory::Provider);
    }
}
