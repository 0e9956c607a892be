//! Error types for the document cache.

use crate::types::DocumentKey;
use thiserror::Error;

/// Result type for cache operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur when mutating the document cache.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Update or removal of a document that is not in the cache.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// The key that was looked up.
        key: DocumentKey,
    },

    /// Insertion of a document whose key is already taken.
    #[error("document already exists: {key}")]
    DocumentExists {
        /// The conflicting key.
        key: DocumentKey,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(key: &DocumentKey) -> Self {
        Self::DocumentNotFound { key: key.clone() }
    }

    /// Creates an already-exists error.
    pub fn exists(key: &DocumentKey) -> Self {
        Self::DocumentExists { key: key.clone() }
    }
}
