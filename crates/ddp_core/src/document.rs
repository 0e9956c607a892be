//! Documents and field-level merging.

use crate::types::{DocumentId, DocumentKey, Fields, Value};

/// A snapshot of one cached document.
///
/// Documents handed out by the database are copies; later changes to the
/// cache do not affect a snapshot already returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    key: DocumentKey,
    fields: Fields,
}

impl Document {
    /// Creates a document snapshot.
    pub fn new(key: DocumentKey, fields: Fields) -> Self {
        Self { key, fields }
    }

    /// Returns the document key.
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Returns the document ID.
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        self.key.id()
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.key.collection()
    }

    /// Returns all fields.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Returns a single field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Consumes the snapshot, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

/// Applies a field-level delta to `target`.
///
/// Only fields named in `changed` or `cleared` are touched. Removal is never
/// inferred from absence: a field disappears only when it is listed in
/// `cleared`.
pub fn merge_fields(target: &mut Fields, changed: &Fields, cleared: &[String]) {
    for (name, value) in changed {
        target.insert(name.clone(), value.clone());
    }
    for name in cleared {
        target.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_touches_only_named_fields() {
        let mut target = fields(&[("a", json!(1)), ("b", json!(2))]);
        merge_fields(&mut target, &fields(&[("b", json!(3))]), &[]);
        assert_eq!(target, fields(&[("a", json!(1)), ("b", json!(3))]));
    }

    #[test]
    fn merge_clears_explicitly() {
        let mut target = fields(&[("a", json!(1)), ("b", json!(2))]);
        merge_fields(&mut target, &Fields::new(), &["a".to_string()]);
        assert_eq!(target, fields(&[("b", json!(2))]));
    }

    #[test]
    fn snapshot_accessors() {
        let doc = Document::new(
            DocumentKey::new("players", "p1"),
            fields(&[("name", json!("Ada"))]),
        );
        assert_eq!(doc.collection(), "players");
        assert_eq!(doc.id().as_str(), "p1");
        assert_eq!(doc.field("name"), Some(&json!("Ada")));
        assert_eq!(doc.field("score"), None);
    }

    /// A delta is either a set of one field or a clear of one field.
    fn delta_strategy() -> impl Strategy<Value = (String, Option<i64>)> {
        (
            prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(String::from),
            prop::option::of(any::<i64>()),
        )
    }

    proptest! {
        #[test]
        fn merge_equals_last_write_per_field(deltas in prop::collection::vec(delta_strategy(), 0..32)) {
            let mut merged = Fields::new();
            for (name, value) in &deltas {
                match value {
                    Some(v) => merge_fields(&mut merged, &fields(&[(name.as_str(), json!(v))]), &[]),
                    None => merge_fields(&mut merged, &Fields::new(), &[name.clone()]),
                }
            }

            for name in ["a", "b", "c", "d"] {
                let last = deltas.iter().rev().find(|(n, _)| n == name);
                let expected = last.and_then(|(_, v)| v.map(|v| json!(v)));
                prop_assert_eq!(merged.get(name).cloned(), expected);
            }
        }
    }
}
