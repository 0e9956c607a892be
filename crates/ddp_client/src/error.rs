//! Error types for the client.

use ddp_protocol::{MethodError, ProtocolError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while running the client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the connection can be retried.
        retryable: bool,
    },

    /// The server sent a frame that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server does not speak any of the offered protocol versions.
    #[error("protocol version mismatch: offered {offered:?}, server wants {server}")]
    VersionMismatch {
        /// Versions offered by the client.
        offered: Vec<String>,
        /// Version suggested by the server.
        server: String,
    },

    /// A method failed on the server.
    #[error("method failed: {0}")]
    Method(MethodError),

    /// A subscription was refused or stopped.
    #[error("subscription failed: {0}")]
    Subscription(MethodError),

    /// No heartbeat reply or handshake within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The operation needs an established session.
    #[error("not connected to server")]
    NotConnected,

    /// A stub failed while simulating a method.
    #[error("stub for {method} failed: {error}")]
    Stub {
        /// Method name.
        method: String,
        /// Error returned by the stub.
        error: MethodError,
    },

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Credential(String),

    /// The client task has stopped.
    #[error("client has shut down")]
    Shutdown,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if reconnecting may resolve this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Timeout => true,
            ClientError::Protocol(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection reset").is_retryable());
        assert!(!ClientError::transport_fatal("invalid certificate").is_retryable());
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Protocol(ProtocolError::malformed("x")).is_retryable());
        assert!(!ClientError::VersionMismatch {
            offered: vec!["1".into()],
            server: "2".into(),
        }
        .is_retryable());
        assert!(!ClientError::Shutdown.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = ClientError::Method(MethodError::new(403, "Denied"));
        assert_eq!(err.to_string(), "method failed: Denied [403]");

        let err = ClientError::VersionMismatch {
            offered: vec!["1".into()],
            server: "pre1".into(),
        };
        assert!(err.to_string().contains("pre1"));
    }
}
