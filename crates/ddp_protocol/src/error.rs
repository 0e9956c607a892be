//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An inbound frame could not be decoded.
    #[error("malformed message: {message}")]
    Malformed {
        /// Description of the decoding error.
        message: String,
    },

    /// An outbound message could not be encoded.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the encoding error.
        message: String,
    },
}

impl ProtocolError {
    /// Create a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ProtocolError::malformed("missing msg").to_string(),
            "malformed message: missing msg"
        );
        assert_eq!(
            ProtocolError::encode("boom").to_string(),
            "encoding failed: boom"
        );
    }
}
