//! Scoped transactions over the document cache.

use crate::changes::{DatabaseChanges, DocumentChangeDetails};
use crate::database::{Database, DatabaseState};
use crate::document::{merge_fields, Document};
use crate::error::{CoreError, CoreResult};
use crate::types::{DocumentKey, Fields};
use parking_lot::ReentrantMutexGuard;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Remembers the state of every document a scope touched, as it was when
/// the scope first touched it.
#[derive(Debug, Default)]
pub(crate) struct ChangeRecorder {
    before: BTreeMap<DocumentKey, Option<Fields>>,
}

impl ChangeRecorder {
    pub(crate) fn is_recorded(&self, key: &DocumentKey) -> bool {
        self.before.contains_key(key)
    }

    pub(crate) fn record(&mut self, key: &DocumentKey, current: Option<Fields>) {
        self.before.entry(key.clone()).or_insert(current);
    }

    /// Folds an inner scope into this one. Earlier snapshots win.
    pub(crate) fn absorb(&mut self, inner: ChangeRecorder) {
        for (key, before) in inner.before {
            self.before.entry(key).or_insert(before);
        }
    }

    /// Compares the recorded snapshots with the current state.
    pub(crate) fn diff(&self, state: &DatabaseState) -> DatabaseChanges {
        let mut changes = DatabaseChanges::new();
        for (key, before) in &self.before {
            let after = state.get(key).cloned();
            if *before != after {
                changes.insert(DocumentChangeDetails::new(key.clone(), before.clone(), after));
            }
        }
        changes
    }

    pub(crate) fn into_snapshots(self) -> BTreeMap<DocumentKey, Option<Fields>> {
        self.before
    }
}

/// An open transaction.
///
/// Obtained through [`Database::perform_updates`] or
/// [`Database::transaction`]. All document mutations go through this type,
/// so no document can change outside a transaction boundary. The
/// transaction holds the database lock for its whole lifetime; reads through
/// the [`Database`] from the same thread still work.
pub struct Transaction<'db> {
    db: &'db Database,
    guard: ReentrantMutexGuard<'db, RefCell<DatabaseState>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        db: &'db Database,
        guard: ReentrantMutexGuard<'db, RefCell<DatabaseState>>,
    ) -> Self {
        Self { db, guard }
    }

    pub(crate) fn into_guard(self) -> ReentrantMutexGuard<'db, RefCell<DatabaseState>> {
        self.guard
    }

    /// Returns the database this transaction belongs to.
    #[must_use]
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Returns a snapshot of a document.
    #[must_use]
    pub fn document(&self, key: &DocumentKey) -> Option<Document> {
        self.fields(key).map(|fields| Document::new(key.clone(), fields))
    }

    /// Returns a copy of a document's fields.
    #[must_use]
    pub fn fields(&self, key: &DocumentKey) -> Option<Fields> {
        self.guard.borrow().get(key).cloned()
    }

    /// Returns true if the document exists.
    #[must_use]
    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.guard.borrow().get(key).is_some()
    }

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentExists` if the key is already taken.
    pub fn insert_document(&mut self, key: DocumentKey, fields: Fields) -> CoreResult<()> {
        let mut state = self.guard.borrow_mut();
        if state.get(&key).is_some() {
            return Err(CoreError::exists(&key));
        }
        state.write(&key, Some(fields));
        Ok(())
    }

    /// Applies a field-level update to an existing document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document is absent.
    pub fn update_document(
        &mut self,
        key: &DocumentKey,
        changed: &Fields,
        cleared: &[String],
    ) -> CoreResult<()> {
        let mut state = self.guard.borrow_mut();
        let mut fields = state.get(key).cloned().ok_or_else(|| CoreError::not_found(key))?;
        merge_fields(&mut fields, changed, cleared);
        state.write(key, Some(fields));
        Ok(())
    }

    /// Inserts the document, or merges `fields` into it if it already exists.
    pub fn merge_document(&mut self, key: &DocumentKey, fields: &Fields) {
        let mut state = self.guard.borrow_mut();
        let mut merged = state.get(key).cloned().unwrap_or_default();
        merge_fields(&mut merged, fields, &[]);
        state.write(key, Some(merged));
    }

    /// Removes a document, returning its last fields.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document is absent.
    pub fn remove_document(&mut self, key: &DocumentKey) -> CoreResult<Fields> {
        let mut state = self.guard.borrow_mut();
        let fields = state.get(key).cloned().ok_or_else(|| CoreError::not_found(key))?;
        state.write(key, None);
        Ok(fields)
    }

    /// Sets the complete state of a document: `Some` replaces all fields
    /// (creating the document if needed), `None` removes it.
    pub fn replace_document(&mut self, key: &DocumentKey, fields: Option<Fields>) {
        self.guard.borrow_mut().write(key, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_twice_fails() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        let result = db.perform_updates(|txn| {
            txn.insert_document(key.clone(), Fields::new())?;
            txn.insert_document(key.clone(), Fields::new())
        });
        assert_eq!(result, Err(CoreError::exists(&key)));
    }

    #[test]
    fn update_missing_fails() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        let result = db.perform_updates(|txn| txn.update_document(&key, &Fields::new(), &[]));
        assert_eq!(result, Err(CoreError::not_found(&key)));
    }

    #[test]
    fn merge_inserts_then_merges() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| {
            txn.merge_document(&key, &fields(&[("a", json!(1))]));
            txn.merge_document(&key, &fields(&[("b", json!(2))]));
        });
        let doc = db.document_with_key(&key).unwrap();
        assert_eq!(doc.fields(), &fields(&[("a", json!(1)), ("b", json!(2))]));
    }

    #[test]
    fn reads_inside_transaction_see_own_writes() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| {
            txn.replace_document(&key, Some(fields(&[("a", json!(1))])));
            assert!(txn.contains(&key));
            assert_eq!(txn.database().document_with_key(&key).unwrap().field("a"), Some(&json!(1)));
            txn.remove_document(&key).unwrap();
            assert!(txn.document(&key).is_none());
        });
    }

    #[test]
    fn recorder_keeps_first_snapshot() {
        let key = DocumentKey::new("c", "1");
        let mut outer = ChangeRecorder::default();
        outer.record(&key, None);

        let mut inner = ChangeRecorder::default();
        inner.record(&key, Some(Fields::new()));
        outer.absorb(inner);

        assert_eq!(outer.into_snapshots().remove(&key), Some(None));
    }
}
