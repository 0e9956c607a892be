//! Database facade.

use crate::change_feed::ChangeFeed;
use crate::changes::DatabaseChanges;
use crate::collection::{Collection, Collections};
use crate::document::Document;
use crate::transaction::{ChangeRecorder, Transaction};
use crate::types::{DocumentId, DocumentKey, Fields, Value};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;

/// Which documents of a collection a fetch returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Every document.
    All,
    /// The document with this ID, if present.
    Id(DocumentId),
    /// Documents whose field equals the value.
    FieldEquals {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
}

/// A read request against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Collection to read from.
    pub collection: String,
    /// Document selector.
    pub selector: Selector,
}

impl FetchRequest {
    /// Fetches every document of a collection.
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            selector: Selector::All,
        }
    }

    /// Fetches one document by ID.
    pub fn by_id(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            selector: Selector::Id(id.into()),
        }
    }

    /// Fetches documents whose `field` equals `value`.
    pub fn field_equals(
        collection: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            collection: collection.into(),
            selector: Selector::FieldEquals {
                field: field.into(),
                value,
            },
        }
    }
}

/// Mutable state behind the database lock.
#[derive(Debug, Default)]
pub(crate) struct DatabaseState {
    collections: BTreeMap<String, BTreeMap<DocumentId, Fields>>,
    /// Open transaction scopes, innermost last.
    scopes: Vec<ChangeRecorder>,
}

impl DatabaseState {
    pub(crate) fn get(&self, key: &DocumentKey) -> Option<&Fields> {
        self.collections
            .get(key.collection())
            .and_then(|docs| docs.get(key.id()))
    }

    pub(crate) fn collection(&self, name: &str) -> Option<&BTreeMap<DocumentId, Fields>> {
        self.collections.get(name)
    }

    pub(crate) fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Writes a document, recording its previous state in the innermost scope.
    pub(crate) fn write(&mut self, key: &DocumentKey, fields: Option<Fields>) {
        let needs_snapshot = self
            .scopes
            .last()
            .map(|scope| !scope.is_recorded(key))
            .unwrap_or(false);
        if needs_snapshot {
            let current = self.get(key).cloned();
            if let Some(scope) = self.scopes.last_mut() {
                scope.record(key, current);
            }
        }
        self.put_raw(key, fields);
    }

    fn put_raw(&mut self, key: &DocumentKey, fields: Option<Fields>) {
        match fields {
            Some(fields) => {
                self.collections
                    .entry(key.collection().to_string())
                    .or_default()
                    .insert(key.id().clone(), fields);
            }
            None => {
                if let Some(docs) = self.collections.get_mut(key.collection()) {
                    docs.remove(key.id());
                }
            }
        }
    }

    fn rollback(&mut self, recorder: ChangeRecorder) {
        for (key, before) in recorder.into_snapshots() {
            self.put_raw(&key, before);
        }
    }
}

/// The root owner of all cached collections.
///
/// `Database` provides:
/// - Snapshot reads (`execute_fetch`, `document_with_key`)
/// - Scoped transactions (`perform_updates`, `transaction`)
/// - A change feed emitting one `DatabaseChanges` per outermost transaction
///
/// The database is shared between threads behind an `Arc`. A re-entrant lock
/// serializes transactions: a transaction started on another thread waits
/// until the current one completes, while nested transactions on the same
/// thread are absorbed by the outer one.
///
/// # Example
///
/// ```rust,ignore
/// let db = Database::new();
/// db.perform_updates(|txn| {
///     txn.merge_document(&DocumentKey::new("players", "p1"), &fields);
/// });
/// ```
pub struct Database {
    state: ReentrantMutex<RefCell<DatabaseState>>,
    feed: ChangeFeed,
    last_sequence: AtomicU64,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(DatabaseState::default())),
            feed: ChangeFeed::new(),
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Returns the documents matched by a fetch request, in ID order.
    ///
    /// The result is a consistent snapshot: no transaction can interleave
    /// with the read.
    pub fn execute_fetch(&self, request: &FetchRequest) -> Vec<Document> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let Some(docs) = state.collection(&request.collection) else {
            return Vec::new();
        };

        let to_document = |(id, fields): (&DocumentId, &Fields)| {
            Document::new(
                DocumentKey::new(request.collection.clone(), id.clone()),
                fields.clone(),
            )
        };

        match &request.selector {
            Selector::All => docs.iter().map(to_document).collect(),
            Selector::Id(id) => docs.get_key_value(id).map(to_document).into_iter().collect(),
            Selector::FieldEquals { field, value } => docs
                .iter()
                .filter(|(_, fields)| fields.get(field) == Some(value))
                .map(to_document)
                .collect(),
        }
    }

    /// Returns a snapshot of one document.
    pub fn document_with_key(&self, key: &DocumentKey) -> Option<Document> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .get(key)
            .map(|fields| Document::new(key.clone(), fields.clone()))
    }

    /// Returns a view of a collection, whether or not it holds documents yet.
    pub fn collection(&self, name: impl Into<String>) -> Collection<'_> {
        Collection::new(self, name.into())
    }

    /// Returns the collections present at call time.
    ///
    /// The returned value can be iterated any number of times; each
    /// collection's documents are read when the view is used.
    pub fn enumerate_collections(&self) -> Collections<'_> {
        let guard = self.state.lock();
        let names = guard.borrow().collection_names();
        Collections::new(self, names)
    }

    /// Runs `body` inside a transaction.
    ///
    /// Exactly one notification is emitted when the outermost transaction
    /// completes with a net change. A body that changes nothing emits
    /// nothing. Calls nested inside another transaction are absorbed.
    pub fn perform_updates<F, R>(&self, body: F) -> R
    where
        F: FnOnce(&mut Transaction<'_>) -> R,
    {
        match self.transaction(|txn| Ok::<R, Infallible>(body(txn))) {
            Ok((result, _)) => result,
            Err(never) => match never {},
        }
    }

    /// Runs a fallible `body` inside a transaction.
    ///
    /// On `Ok` the changes made by this scope are returned alongside the
    /// body's value (even when nested, in which case nothing is emitted yet).
    /// On `Err` every mutation of the scope is rolled back and nothing is
    /// emitted.
    pub fn transaction<F, R, E>(&self, body: F) -> Result<(R, DatabaseChanges), E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, E>,
    {
        let guard = self.state.lock();
        guard.borrow_mut().scopes.push(ChangeRecorder::default());

        let mut txn = Transaction::new(self, guard);
        let outcome = body(&mut txn);
        let guard = txn.into_guard();

        let mut state = guard.borrow_mut();
        let recorder = state.scopes.pop().unwrap_or_default();

        let result = match outcome {
            Err(err) => {
                state.rollback(recorder);
                return Err(err);
            }
            Ok(result) => result,
        };

        let changes = recorder.diff(&state);
        let outermost = match state.scopes.last_mut() {
            Some(parent) => {
                parent.absorb(recorder);
                false
            }
            None => true,
        };
        drop(state);

        if outermost && !changes.is_empty() {
            let sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let changes = changes.with_sequence(sequence);
            debug!(sequence, documents = changes.len(), "database changed");
            self.feed.emit(Arc::new(changes.clone()));
            return Ok((result, changes));
        }

        Ok((result, changes))
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> Receiver<Arc<DatabaseChanges>> {
        self.feed.subscribe()
    }

    /// Returns the change feed.
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&DatabaseState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeType;
    use crate::error::CoreError;
    use proptest::prelude::*;
    use serde_json::json;
    use std::thread;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn drain(rx: &Receiver<Arc<DatabaseChanges>>) -> Vec<Arc<DatabaseChanges>> {
        rx.try_iter().collect()
    }

    #[test]
    fn empty_transaction_emits_nothing() {
        let db = Database::new();
        let rx = db.subscribe();
        db.perform_updates(|_| {});
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn many_mutations_emit_one_notification() {
        let db = Database::new();
        let rx = db.subscribe();

        db.perform_updates(|txn| {
            for i in 0..10 {
                txn.replace_document(
                    &DocumentKey::new("tasks", i.to_string()),
                    Some(fields(&[("n", json!(i))])),
                );
            }
        });

        let notifications = drain(&rx);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].len(), 10);
        assert_eq!(notifications[0].sequence(), 1);
    }

    #[test]
    fn net_zero_transaction_emits_nothing() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| txn.replace_document(&key, Some(fields(&[("a", json!(1))]))));

        let rx = db.subscribe();
        db.perform_updates(|txn| {
            txn.replace_document(&key, Some(fields(&[("a", json!(2))])));
            txn.replace_document(&key, Some(fields(&[("a", json!(1))])));
        });
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn nested_transactions_are_absorbed() {
        let db = Database::new();
        let rx = db.subscribe();

        let (_, outer) = db
            .transaction(|txn| {
                txn.replace_document(&DocumentKey::new("a", "1"), Some(Fields::new()));
                let (_, inner) = txn.database().transaction(|inner| {
                    inner.replace_document(&DocumentKey::new("b", "1"), Some(Fields::new()));
                    Ok::<_, CoreError>(())
                })?;
                assert_eq!(inner.len(), 1);
                assert_eq!(inner.sequence(), 0);
                Ok::<_, CoreError>(())
            })
            .unwrap();

        assert_eq!(outer.len(), 2);
        let notifications = drain(&rx);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].len(), 2);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| txn.replace_document(&key, Some(fields(&[("a", json!(1))]))));

        let rx = db.subscribe();
        let result: Result<((), DatabaseChanges), CoreError> = db.transaction(|txn| {
            txn.update_document(&key, &fields(&[("a", json!(2))]), &[])?;
            txn.insert_document(DocumentKey::new("tasks", "t2"), Fields::new())?;
            txn.insert_document(key.clone(), Fields::new())
        });

        assert!(result.is_err());
        assert!(drain(&rx).is_empty());
        assert_eq!(db.document_with_key(&key).unwrap().field("a"), Some(&json!(1)));
        assert!(db.document_with_key(&DocumentKey::new("tasks", "t2")).is_none());
    }

    #[test]
    fn failed_nested_scope_keeps_outer_changes() {
        let db = Database::new();
        let rx = db.subscribe();

        db.perform_updates(|txn| {
            txn.replace_document(&DocumentKey::new("a", "1"), Some(Fields::new()));
            let failed: Result<((), DatabaseChanges), CoreError> = txn.database().transaction(|inner| {
                inner.replace_document(&DocumentKey::new("a", "2"), Some(Fields::new()));
                Err(CoreError::not_found(&DocumentKey::new("a", "3")))
            });
            assert!(failed.is_err());
        });

        let notifications = drain(&rx);
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains(&DocumentKey::new("a", "1")));
        assert!(!notifications[0].contains(&DocumentKey::new("a", "2")));
    }

    #[test]
    fn change_details_describe_transition() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| txn.replace_document(&key, Some(fields(&[("a", json!(1))]))));

        let rx = db.subscribe();
        db.perform_updates(|txn| {
            txn.update_document(&key, &fields(&[("b", json!(2))]), &["a".to_string()])
        })
        .unwrap();

        let notifications = drain(&rx);
        let details = notifications[0].change_details(&key).unwrap();
        assert_eq!(details.change_type(), ChangeType::Update);
        assert_eq!(details.fields_before(), Some(&fields(&[("a", json!(1))])));
        assert_eq!(details.fields_after(), Some(&fields(&[("b", json!(2))])));
    }

    #[test]
    fn removed_then_readded_is_an_update_of_the_same_key() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");
        db.perform_updates(|txn| txn.replace_document(&key, Some(fields(&[("a", json!(1))]))));

        let rx = db.subscribe();
        db.perform_updates(|txn| {
            txn.remove_document(&key)?;
            txn.insert_document(key.clone(), fields(&[("a", json!(2))]))
        })
        .unwrap();

        let notifications = drain(&rx);
        let details = notifications[0].change_details(&key).unwrap();
        assert_eq!(details.change_type(), ChangeType::Update);
    }

    #[test]
    fn fetch_selectors() {
        let db = Database::new();
        db.perform_updates(|txn| {
            txn.replace_document(&DocumentKey::new("p", "1"), Some(fields(&[("team", json!("red"))])));
            txn.replace_document(&DocumentKey::new("p", "2"), Some(fields(&[("team", json!("blue"))])));
            txn.replace_document(&DocumentKey::new("p", "3"), Some(fields(&[("team", json!("red"))])));
        });

        assert_eq!(db.execute_fetch(&FetchRequest::all("p")).len(), 3);
        assert_eq!(db.execute_fetch(&FetchRequest::all("missing")).len(), 0);

        let one = db.execute_fetch(&FetchRequest::by_id("p", "2"));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].field("team"), Some(&json!("blue")));

        let red = db.execute_fetch(&FetchRequest::field_equals("p", "team", json!("red")));
        let ids: Vec<_> = red.iter().map(|d| d.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn concurrent_transactions_are_serialized() {
        let db = Arc::new(Database::new());
        let rx = db.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for i in 0..25 {
                        db.perform_updates(|txn| {
                            let key = DocumentKey::new("counters", "c");
                            let current = txn
                                .fields(&key)
                                .and_then(|f| f.get("n").and_then(Value::as_i64))
                                .unwrap_or(0);
                            txn.replace_document(
                                &key,
                                Some(fields(&[("n", json!(current + 1)), ("last", json!(t * 100 + i))])),
                            );
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let doc = db.document_with_key(&DocumentKey::new("counters", "c")).unwrap();
        assert_eq!(doc.field("n"), Some(&json!(100)));

        let sequences: Vec<u64> = drain(&rx).iter().map(|c| c.sequence()).collect();
        assert_eq!(sequences, (1..=100).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn one_notification_per_transaction_with_changes(batches in prop::collection::vec(0usize..5, 1..10)) {
            let db = Database::new();
            let rx = db.subscribe();
            let mut counter = 0;
            let mut expected = 0;

            for batch in &batches {
                db.perform_updates(|txn| {
                    for _ in 0..*batch {
                        counter += 1;
                        txn.replace_document(
                            &DocumentKey::new("c", counter.to_string()),
                            Some(Fields::new()),
                        );
                    }
                });
                if *batch > 0 {
                    expected += 1;
                }
            }

            prop_assert_eq!(drain(&rx).len(), expected);
        }
    }
}
