//! Custom error types for toolrelay
//!
//! Provides a unified error handling system across all modules.

use thiserror::Error;

/// Main error type for toolrelay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing or invalid configuration. Fatal to the whole turn.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chat completion endpoint errors
    #[error("Completion error: {0}")]
    Completion(String),

    /// Malformed JSON-RPC response, HTTP failure or server-side error from the MCP gateway
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// A network call exceeded its hard deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid arguments or a broken conversation invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for toolrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a completion error
    pub fn completion(msg: impl Into<String>) -> Self {
        Self::Completion(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Message without the variant prefix, for embedding in tool results.
    pub fn detail(&self) -> String {
        match self {
            Self::Config(m)
            | Self::Completion(m)
            | Self::Protocol(m)
            | Self::Timeout(m)
            | Self::Validation(m)
            | Self::ToolExecution(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when cut
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé...");
        assert_eq!(excerpt("ok", 10), "ok");
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            RelayError::config("missing model").to_string(),
            "Configuration error: missing model"
        );
        assert_eq!(
            RelayError::timeout("tools/list after 15s").to_string(),
            "Timeout: tools/list after 15s"
        );
    }

    #[test]
    fn test_detail_strips_prefix() {
        let err = RelayError::protocol("Unknown tool: nope");
        assert_eq!(err.detail(), "Unknown tool: nope");
    }
}
