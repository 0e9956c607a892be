//! CLI error type.

use ddp_client::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A positional parameter was not valid JSON.
    #[error("invalid JSON parameter `{input}`: {source}")]
    InvalidParam {
        /// The argument as typed.
        input: String,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The server did not accept a session in time.
    #[error("no session after {0:?}")]
    ConnectTimeout(Duration),

    /// The client engine failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
