//! Authoritative copies of documents written by stubs.
//!
//! While a document carries a stub's optimistic change, the visible cache no
//! longer shows what the server sent. Server deltas for such a document are
//! applied to a shadow copy instead, and once every method whose stub wrote
//! the document has been flushed the shadow replaces the visible document.

use crate::data_update::DataUpdate;
use ddp_core::{DocumentKey, Fields, Transaction};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
struct ServerDocument {
    fields: Option<Fields>,
    claimed_by: BTreeSet<String>,
}

/// Shadow copies keyed by document.
#[derive(Debug, Default)]
pub(crate) struct ServerDocuments {
    documents: BTreeMap<DocumentKey, ServerDocument>,
}

impl ServerDocuments {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records that `method_id`'s stub wrote `key`.
    ///
    /// `server_fields` is the document as it was before the stub ran. It only
    /// seeds the shadow when no other method claims the document already.
    pub(crate) fn claim(&mut self, key: &DocumentKey, server_fields: Option<Fields>, method_id: &str) {
        self.documents
            .entry(key.clone())
            .or_insert_with(|| ServerDocument {
                fields: server_fields,
                claimed_by: BTreeSet::new(),
            })
            .claimed_by
            .insert(method_id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn is_shadowed(&self, key: &DocumentKey) -> bool {
        self.documents.contains_key(key)
    }

    /// Returns the shadow copy of a document, if one is kept.
    #[cfg(test)]
    pub(crate) fn fields(&self, key: &DocumentKey) -> Option<Option<&Fields>> {
        self.documents.get(key).map(|doc| doc.fields.as_ref())
    }

    /// Applies a server delta to the shadow copy when one exists and to the
    /// visible cache otherwise.
    pub(crate) fn apply(&mut self, update: &DataUpdate, txn: &mut Transaction<'_>) {
        match self.documents.get_mut(update.key()) {
            Some(shadow) => shadow.fields = update.apply_to(shadow.fields.take()),
            None => update.apply(txn),
        }
    }

    /// Drops `method_id`'s claims. Every document no longer claimed by any
    /// method is returned with its authoritative state.
    pub(crate) fn release(&mut self, method_id: &str) -> Vec<(DocumentKey, Option<Fields>)> {
        let mut released = Vec::new();
        self.documents.retain(|key, doc| {
            doc.claimed_by.remove(method_id);
            if doc.claimed_by.is_empty() {
                released.push((key.clone(), doc.fields.take()));
                false
            } else {
                true
            }
        });
        released
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddp_core::Database;
    use serde_json::json;

    fn fields(n: i64) -> Fields {
        let mut fields = Fields::new();
        fields.insert("n".into(), json!(n));
        fields
    }

    #[test]
    fn first_claim_seeds_the_shadow() {
        let key = DocumentKey::new("c", "1");
        let mut docs = ServerDocuments::new();
        docs.claim(&key, Some(fields(1)), "1");
        docs.claim(&key, Some(fields(2)), "2");

        assert!(docs.is_shadowed(&key));
        assert_eq!(docs.fields(&key), Some(Some(&fields(1))));
    }

    #[test]
    fn shadowed_updates_skip_the_visible_cache() {
        let db = Database::new();
        let key = DocumentKey::new("c", "1");
        let other = DocumentKey::new("c", "2");
        let mut docs = ServerDocuments::new();
        docs.claim(&key, None, "1");

        db.perform_updates(|txn| {
            docs.apply(&DataUpdate::Added { key: key.clone(), fields: fields(5) }, txn);
            docs.apply(&DataUpdate::Added { key: other.clone(), fields: fields(6) }, txn);
        });

        assert!(db.document_with_key(&key).is_none());
        assert_eq!(db.document_with_key(&other).unwrap().fields(), &fields(6));
        assert_eq!(docs.fields(&key), Some(Some(&fields(5))));
    }

    #[test]
    fn release_returns_documents_without_claims() {
        let a = DocumentKey::new("c", "a");
        let b = DocumentKey::new("c", "b");
        let mut docs = ServerDocuments::new();
        docs.claim(&a, Some(fields(1)), "1");
        docs.claim(&b, None, "1");
        docs.claim(&b, None, "2");

        let released = docs.release("1");
        assert_eq!(released, vec![(a.clone(), Some(fields(1)))]);
        assert_eq!(docs.len(), 1);

        let released = docs.release("2");
        assert_eq!(released, vec![(b, None)]);
        assert_eq!(docs.len(), 0);
    }
}
