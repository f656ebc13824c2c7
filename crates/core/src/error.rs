//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Room errors ---
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    // --- Persistence errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the assistant backend.
///
/// All of these are caught at the assistant session boundary and surfaced to
/// the room as an `llm_error` event; none of them leave partial output in the
/// context window.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The backend could not be reached at all (connection refused, DNS, TLS).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-success status.
    #[error("Backend request failed: {message} (status: {status_code})")]
    Backend { status_code: u16, message: String },

    /// The transport failed while the response body was being read.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// The whole call exceeded its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built (bad URL, unserializable body).
    #[error("Invalid backend request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Stable machine-readable name, sent to clients on `llm_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "llm_unavailable",
            Self::Backend { .. } => "llm_backend_error",
            Self::StreamInterrupted(_) => "llm_stream_error",
            Self::Timeout(_) => "llm_timeout",
            Self::InvalidRequest(_) => "llm_invalid_request",
        }
    }
}

/// Failures raised by the room coordinator against a single requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Room '{room_id}' is full")]
    RoomFull { room_id: String },

    #[error("Connection has not joined a room")]
    NotInRoom,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::Backend {
            status_code: 503,
            message: "model is loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model is loading"));
    }

    #[test]
    fn provider_error_kinds_are_stable() {
        assert_eq!(
            ProviderError::Unavailable("refused".into()).kind(),
            "llm_unavailable"
        );
        assert_eq!(
            ProviderError::Backend {
                status_code: 500,
                message: String::new()
            }
            .kind(),
            "llm_backend_error"
        );
        assert_eq!(
            ProviderError::StreamInterrupted("reset".into()).kind(),
            "llm_stream_error"
        );
        assert_eq!(
            ProviderError::Timeout(Duration::from_secs(5)).kind(),
            "llm_timeout"
        );
    }

    #[test]
    fn room_full_names_the_room() {
        let err = Error::Room(RoomError::RoomFull {
            room_id: "r1".into(),
        });
        assert!(err.to_string().contains("'r1'"));
    }
}
