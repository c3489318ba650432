//! Error types for a3s-relay

use thiserror::Error;

/// Errors that can occur while invoking agents or transcoding their output
#[derive(Debug, Error)]
pub enum RelayError {
    /// The agent raised an error while executing an instruction
    #[error("Execution error: {0}")]
    Execution(String),

    /// Restoring a conversation history failed; the agent's history can no
    /// longer be trusted
    #[error("Conversation history corrupted for agent '{agent}': {reason}")]
    HistoryCorrupted { agent: String, reason: String },

    /// The agent was poisoned by an earlier history corruption
    #[error("Agent '{0}' is unavailable until its history is recovered")]
    AgentPoisoned(String),

    /// The consumer of an event stream went away
    #[error("Event stream cancelled")]
    Cancelled,

    /// Malformed request from an HTTP client
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// History store failure
    #[error("History store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl RelayError {
    /// Whether this error means the agent's history is no longer trustworthy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::HistoryCorrupted { .. } | RelayError::AgentPoisoned(_)
        )
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for axum::response::Response {
    fn from(err: RelayError) -> Self {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let (status, kind) = match &err {
            RelayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            RelayError::AgentPoisoned(_) | RelayError::HistoryCorrupted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "server_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };

        let body = serde_json::json!({
            "error": {
                "message": err.to_string(),
                "type": kind,
                "code": null
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let corrupted = RelayError::HistoryCorrupted {
            agent: "mock".to_string(),
            reason: "disk full".to_string(),
        };
        assert!(corrupted.is_fatal());
        assert!(RelayError::AgentPoisoned("mock".to_string()).is_fatal());
        assert!(!RelayError::Execution("boom".to_string()).is_fatal());
        assert!(!RelayError::Cancelled.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = RelayError::HistoryCorrupted {
            agent: "shell".to_string(),
            reason: "write failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Conversation history corrupted for agent 'shell': write failed"
        );
        assert_eq!(
            RelayError::Execution("exit status 2".to_string()).to_string(),
            "Execution error: exit status 2"
        );
    }

    #[test]
    fn test_invalid_request_maps_to_bad_request() {
        let response: axum::response::Response =
            RelayError::InvalidRequest("no user message".to_string()).into();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_poisoned_maps_to_unavailable() {
        let response: axum::response::Response =
            RelayError::AgentPoisoned("mock".to_string()).into();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
