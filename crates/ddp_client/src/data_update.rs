//! Server data deltas.
//!
//! `added`, `changed` and `removed` messages are turned into [`DataUpdate`]s
//! and applied either to the visible cache or to a shadow copy of a document
//! (see `server_documents`).

use ddp_core::{merge_fields, DocumentKey, Fields, Transaction};
use ddp_protocol::ServerMessage;
use tracing::warn;

/// One server-authoritative change to one document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DataUpdate {
    Added { key: DocumentKey, fields: Fields },
    Changed {
        key: DocumentKey,
        fields: Fields,
        cleared: Vec<String>,
    },
    Removed { key: DocumentKey },
}

impl DataUpdate {
    /// Converts a data message; other messages yield `None`.
    pub(crate) fn from_message(message: ServerMessage) -> Option<Self> {
        match message {
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => Some(DataUpdate::Added {
                key: DocumentKey::new(collection, id),
                fields,
            }),
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => Some(DataUpdate::Changed {
                key: DocumentKey::new(collection, id),
                fields,
                cleared,
            }),
            ServerMessage::Removed { collection, id } => Some(DataUpdate::Removed {
                key: DocumentKey::new(collection, id),
            }),
            _ => None,
        }
    }

    pub(crate) fn key(&self) -> &DocumentKey {
        match self {
            DataUpdate::Added { key, .. }
            | DataUpdate::Changed { key, .. }
            | DataUpdate::Removed { key } => key,
        }
    }

    /// Computes the state of a document after this update.
    ///
    /// `added` on an existing document merges its fields. `changed` and
    /// `removed` on an absent document are stale and leave it absent.
    pub(crate) fn apply_to(&self, current: Option<Fields>) -> Option<Fields> {
        match (self, current) {
            (DataUpdate::Added { fields, .. }, current) => {
                let mut merged = current.unwrap_or_default();
                merge_fields(&mut merged, fields, &[]);
                Some(merged)
            }
            (DataUpdate::Changed { fields, cleared, .. }, Some(mut current)) => {
                merge_fields(&mut current, fields, cleared);
                Some(current)
            }
            (DataUpdate::Changed { key, .. }, None) => {
                warn!(%key, "ignoring change for unknown document");
                None
            }
            (DataUpdate::Removed { key }, current) => {
                if current.is_none() {
                    warn!(%key, "ignoring removal of unknown document");
                }
                None
            }
        }
    }

    /// Applies the update to the visible cache.
    pub(crate) fn apply(&self, txn: &mut Transaction<'_>) {
        let key = self.key();
        let current = txn.fields(key);
        let existed = current.is_some();
        let next = self.apply_to(current);
        if existed || next.is_some() {
            txn.replace_document(key, next);
        }
    }
}
