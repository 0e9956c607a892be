//! Read-only collection views.

use crate::database::Database;
use crate::document::Document;
use crate::types::{DocumentId, DocumentKey};

/// A named view over one collection of a [`Database`].
///
/// A view holds no data. Every read takes a fresh snapshot, so a view
/// obtained before a transaction reflects that transaction afterwards.
#[derive(Clone)]
pub struct Collection<'db> {
    db: &'db Database,
    name: String,
}

impl<'db> Collection<'db> {
    pub(crate) fn new(db: &'db Database, name: String) -> Self {
        Self { db, name }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning database.
    #[must_use]
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Returns a snapshot of every document, in ID order.
    #[must_use]
    pub fn all_documents(&self) -> Vec<Document> {
        self.db.with_state(|state| {
            state
                .collection(&self.name)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, fields)| {
                            let key = DocumentKey::new(self.name.as_str(), id.clone());
                            Document::new(key, fields.clone())
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Returns a snapshot of one document.
    #[must_use]
    pub fn document_with_id(&self, id: impl Into<DocumentId>) -> Option<Document> {
        self.db
            .document_with_key(&DocumentKey::new(self.name.as_str(), id.into()))
    }

    /// Number of documents currently in the collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.db
            .with_state(|state| state.collection(&self.name).map_or(0, |docs| docs.len()))
    }

    /// Returns true if the collection holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

/// The set of collections present when it was enumerated.
///
/// Iterating is restartable: [`Collections::iter`] may be called any number
/// of times and yields the same names each time.
pub struct Collections<'db> {
    db: &'db Database,
    names: Vec<String>,
}

impl<'db> Collections<'db> {
    pub(crate) fn new(db: &'db Database, names: Vec<String>) -> Self {
        Self { db, names }
    }

    /// Iterates over the collection views.
    pub fn iter(&self) -> impl Iterator<Item = Collection<'db>> + '_ {
        self.names
            .iter()
            .map(move |name| Collection::new(self.db, name.clone()))
    }

    /// Returns the collection names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no collection was present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
