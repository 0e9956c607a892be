//! Coalesced change descriptions.
//!
//! A `DatabaseChanges` value is produced by every transaction. It holds one
//! `DocumentChangeDetails` per affected document with the complete field set
//! before and after the transaction, which makes every change exactly
//! reversible.

use crate::types::{DocumentKey, Fields, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Kind of change a document went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Document did not exist before and exists after.
    Add,
    /// Document existed before and after, with different fields.
    Update,
    /// Document existed before and does not exist after.
    Remove,
}

/// Before/after description of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChangeDetails {
    key: DocumentKey,
    fields_before: Option<Fields>,
    fields_after: Option<Fields>,
}

impl DocumentChangeDetails {
    /// Creates change details.
    pub fn new(key: DocumentKey, fields_before: Option<Fields>, fields_after: Option<Fields>) -> Self {
        Self {
            key,
            fields_before,
            fields_after,
        }
    }

    /// Returns the affected key.
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Fields before the change (`None` if the document did not exist).
    #[must_use]
    pub fn fields_before(&self) -> Option<&Fields> {
        self.fields_before.as_ref()
    }

    /// Fields after the change (`None` if the document was removed).
    #[must_use]
    pub fn fields_after(&self) -> Option<&Fields> {
        self.fields_after.as_ref()
    }

    /// Returns the change kind.
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        match (&self.fields_before, &self.fields_after) {
            (None, Some(_)) => ChangeType::Add,
            (Some(_), None) => ChangeType::Remove,
            _ => ChangeType::Update,
        }
    }

    /// Returns every field whose value differs between before and after.
    ///
    /// A `None` value means the field was cleared.
    #[must_use]
    pub fn changed_fields(&self) -> BTreeMap<String, Option<Value>> {
        let empty = Fields::new();
        let before = self.fields_before.as_ref().unwrap_or(&empty);
        let after = self.fields_after.as_ref().unwrap_or(&empty);

        let mut changed = BTreeMap::new();
        for (name, value) in after {
            if before.get(name) != Some(value) {
                changed.insert(name.clone(), Some(value.clone()));
            }
        }
        for name in before.keys() {
            if !after.contains_key(name) {
                changed.insert(name.clone(), None);
            }
        }
        changed
    }
}

/// All changes performed by one transaction, keyed by document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseChanges {
    sequence: u64,
    details: BTreeMap<DocumentKey, DocumentChangeDetails>,
}

impl DatabaseChanges {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the notification that carried these changes.
    ///
    /// Zero for changes that were never emitted (nested or captured scopes).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Records the change of one document, replacing earlier details for the
    /// same key.
    pub fn insert(&mut self, details: DocumentChangeDetails) {
        self.details.insert(details.key.clone(), details);
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Number of affected documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.details.len()
    }

    /// Returns true if the given document was affected.
    #[must_use]
    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.details.contains_key(key)
    }

    /// Returns the details for one document.
    #[must_use]
    pub fn change_details(&self, key: &DocumentKey) -> Option<&DocumentChangeDetails> {
        self.details.get(key)
    }

    /// Iterates over the affected keys in order.
    pub fn affected_keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.details.keys()
    }

    /// Iterates over all change details in key order.
    pub fn iter(&self) -> btree_map::Values<'_, DocumentKey, DocumentChangeDetails> {
        self.details.values()
    }
}

impl<'a> IntoIterator for &'a DatabaseChanges {
    type Item = &'a DocumentChangeDetails;
    type IntoIter = btree_map::Values<'a, DocumentKey, DocumentChangeDetails>;

    fn into_iter(self) -> Self::IntoIter {
        self.details.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn change_types() {
        let key = DocumentKey::new("c", "1");
        let add = DocumentChangeDetails::new(key.clone(), None, Some(Fields::new()));
        let remove = DocumentChangeDetails::new(key.clone(), Some(Fields::new()), None);
        let update = DocumentChangeDetails::new(
            key,
            Some(fields(&[("a", json!(1))])),
            Some(fields(&[("a", json!(2))])),
        );
        assert_eq!(add.change_type(), ChangeType::Add);
        assert_eq!(remove.change_type(), ChangeType::Remove);
        assert_eq!(update.change_type(), ChangeType::Update);
    }

    #[test]
    fn changed_fields_reports_sets_and_clears() {
        let details = DocumentChangeDetails::new(
            DocumentKey::new("c", "1"),
            Some(fields(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))])),
            Some(fields(&[("a", json!(1)), ("b", json!(5)), ("d", json!(4))])),
        );
        let changed = details.changed_fields();
        assert_eq!(changed.len(), 3);
        assert_eq!(changed["b"], Some(json!(5)));
        assert_eq!(changed["c"], None);
        assert_eq!(changed["d"], Some(json!(4)));
        assert!(!changed.contains_key("a"));
    }

    #[test]
    fn changes_are_keyed_by_document() {
        let mut changes = DatabaseChanges::new();
        assert!(changes.is_empty());

        let key = DocumentKey::new("c", "1");
        changes.insert(DocumentChangeDetails::new(key.clone(), None, Some(Fields::new())));
        changes.insert(DocumentChangeDetails::new(
            key.clone(),
            None,
            Some(fields(&[("a", json!(1))])),
        ));

        assert_eq!(changes.len(), 1);
        assert!(changes.contains(&key));
        assert_eq!(
            changes.change_details(&key).unwrap().fields_after(),
            Some(&fields(&[("a", json!(1))]))
        );
        assert_eq!(changes.affected_keys().count(), 1);
        assert_eq!((&changes).into_iter().count(), 1);
    }
}
