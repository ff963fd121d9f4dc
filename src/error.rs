//! Gateway error types.
//!
//! Structural misuse (duplicate ids, unknown ids, unknown client types, bad
//! configuration) is returned synchronously. Operational failures (unreachable
//! servers, failed tool calls) are either recorded as health state or passed
//! through to the caller unchanged.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Server already exists: {0}")]
    AlreadyExists(String),

    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Unsupported client type: {0}")]
    UnsupportedClientType(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("{0} already running")]
    AlreadyRunning(String),

    #[error("{0} not running")]
    NotRunning(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Caller bugs and bad configuration, as opposed to runtime failures of a backend.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GatewayError::AlreadyExists(_)
                | GatewayError::NotFound(_)
                | GatewayError::UnsupportedClientType(_)
                | GatewayError::AlreadyRunning(_)
                | GatewayError::NotRunning(_)
                | GatewayError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(GatewayError::AlreadyExists("s1".into()).is_structural());
        assert!(GatewayError::UnsupportedClientType("ws".into()).is_structural());
        assert!(!GatewayError::ConnectionFailed("refused".into()).is_structural());
        assert!(!GatewayError::ExecutionFailed("boom".into()).is_structural());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GatewayError::NotFound("s1".into()).to_string(),
            "Server not found: s1"
        );
        assert_eq!(
            GatewayError::AlreadyRunning("auto-discovery".into()).to_string(),
            "auto-discovery already running"
        );
    }
}
