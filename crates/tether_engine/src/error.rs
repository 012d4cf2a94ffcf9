//! Error types for the sync engine.

use tether_protocol::ProtocolError;
use tether_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// User-facing text for requests that never reached the server.
pub const CONNECTIVITY_MESSAGE: &str =
    "Unable to reach the server. Check your connection and try again.";

/// User-facing text shown when the session has expired.
pub const SIGN_IN_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response reached the client.
    #[error("{message}")]
    Connectivity {
        /// Rewritten, user-facing message.
        message: String,
        /// Underlying transport error.
        detail: String,
    },

    /// The server answered 401. Never queued.
    #[error("authentication required")]
    AuthRequired,

    /// The server answered with a non-2xx status.
    #[error("server rejected request ({status}): {message}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, or the status text.
        message: String,
    },

    /// A push message did not match the envelope contract.
    #[error("malformed push message: {0}")]
    MalformedPush(String),

    /// A queued change failed replay too many times and was dropped.
    #[error("queued change {queue_id} dropped after {attempts} failed replays: {last_error}")]
    ReplayExhausted {
        /// Queue id of the dropped change.
        queue_id: String,
        /// Number of failed attempts.
        attempts: u32,
        /// Error of the last attempt.
        last_error: String,
    },

    /// Journal storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A response body could not be interpreted.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An application-level failure raised by caller code.
    #[error("{0}")]
    Failed(String),
}

impl SyncError {
    /// Creates a connectivity error with the rewritten user-facing message.
    pub fn connectivity(detail: impl Into<String>) -> Self {
        Self::Connectivity {
            message: CONNECTIVITY_MESSAGE.to_string(),
            detail: detail.into(),
        }
    }

    /// Creates an application-level failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true if the request never reached the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity { .. })
    }

    /// Text suitable for a toast or inline error.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Connectivity { message, .. } => message.clone(),
            SyncError::AuthRequired => SIGN_IN_MESSAGE.to_string(),
            SyncError::ServerRejected { message, .. } => message.clone(),
            SyncError::Failed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// A transport-level failure: no response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// Creates a transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::connectivity(err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors() {
        assert!(SyncError::connectivity("connection reset").is_connectivity());
        assert!(!SyncError::ServerRejected {
            status: 503,
            message: "busy".into()
        }
        .is_connectivity());
        assert!(!SyncError::AuthRequired.is_connectivity());
    }

    #[test]
    fn connectivity_message_is_rewritten() {
        let err: SyncError = TransportError::new("dns error: no such host").into();
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), CONNECTIVITY_MESSAGE);
        assert_eq!(err.user_message(), CONNECTIVITY_MESSAGE);
    }

    #[test]
    fn user_messages() {
        assert_eq!(SyncError::AuthRequired.user_message(), SIGN_IN_MESSAGE);
        let err = SyncError::ServerRejected {
            status: 409,
            message: "Chore already completed".into(),
        };
        assert_eq!(err.user_message(), "Chore already completed");
        assert!(err.to_string().contains("409"));
    }
}
