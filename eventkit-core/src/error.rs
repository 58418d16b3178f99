//! Error types for eventkit-core

use thiserror::Error;

/// Stable error-code strings handed to [`Callback::on_error`](crate::Callback::on_error).
pub mod codes {
    /// The client could not be initialized
    pub const INIT_ERROR: &str = "init_error";
    /// Database or table name failed validation
    pub const INVALID_PARAM: &str = "invalid_param";
    /// The record itself is malformed
    pub const INVALID_EVENT: &str = "invalid_event";
    /// The record could not be serialized or deserialized
    pub const DATA_CONVERSION: &str = "data_conversion";
    /// Local queue storage failed or is full
    pub const STORAGE_ERROR: &str = "storage_error";
    /// The endpoint could not be reached
    pub const NETWORK_ERROR: &str = "network_error";
    /// The endpoint answered with an error or rejected events
    pub const SERVER_RESPONSE: &str = "server_response";
    /// Fallback when the collaborator reports no code
    pub const UNKNOWN_ERROR: &str = "unknown_error";
}

/// Main error type for the eventkit-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database/table name rejected by the naming policy
    #[error("{0}")]
    InvalidParam(String),

    /// Record rejected before it reached the queue
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Queue storage refused the record
    #[error("storage error: {0}")]
    Storage(String),

    /// Request never produced an HTTP response
    #[error("network error: {0}")]
    Network(String),

    /// Endpoint answered, but not with full acceptance
    #[error("server response ({status}): {message}")]
    ServerResponse { status: u16, message: String },

    /// Failure reported by a queue collaborator, with its own code if any
    #[error("transport error: {message}")]
    Transport {
        code: Option<String>,
        message: String,
    },
}

impl Error {
    /// The error-code string for this failure, if one is known.
    ///
    /// `Transport` errors carry whatever the collaborator supplied, which may be nothing.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Error::Database(_) | Error::Io(_) | Error::Storage(_) => Some(codes::STORAGE_ERROR),
            Error::Json(_) => Some(codes::DATA_CONVERSION),
            Error::Config(_) => Some(codes::INIT_ERROR),
            Error::InvalidParam(_) => Some(codes::INVALID_PARAM),
            Error::InvalidEvent(_) => Some(codes::INVALID_EVENT),
            Error::Network(_) => Some(codes::NETWORK_ERROR),
            Error::ServerResponse { .. } => Some(codes::SERVER_RESPONSE),
            Error::Transport { code, .. } => code.as_deref(),
        }
    }

    /// Whether retrying the same request could succeed (timeouts, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::ServerResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for eventkit-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidParam("x".into()).error_code(),
            Some(codes::INVALID_PARAM)
        );
        assert_eq!(
            Error::Network("timeout".into()).error_code(),
            Some(codes::NETWORK_ERROR)
        );
        assert_eq!(
            Error::Transport {
                code: Some("queue_full".into()),
                message: "full".into()
            }
            .error_code(),
            Some("queue_full")
        );
        assert_eq!(
            Error::Transport {
                code: None,
                message: "?".into()
            }
            .error_code(),
            None
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::Network("connection refused".into()).is_transient());
        assert!(Error::ServerResponse {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!Error::ServerResponse {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!Error::InvalidEvent("empty".into()).is_transient());
    }
}
