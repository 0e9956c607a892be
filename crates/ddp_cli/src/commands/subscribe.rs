//! Subscribe command implementation.

use crate::error::CliResult;
use ddp_client::ClientHandle;
use ddp_core::{ChangeType, DatabaseChanges, Document, Fields, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One cached document.
#[derive(Debug, Serialize)]
pub struct DocumentOutput {
    /// Collection name.
    pub collection: String,
    /// Document ID.
    pub id: String,
    /// Current fields.
    pub fields: Fields,
}

impl From<&Document> for DocumentOutput {
    fn from(doc: &Document) -> Self {
        Self {
            collection: doc.collection().to_string(),
            id: doc.id().to_string(),
            fields: doc.fields().clone(),
        }
    }
}

/// One document change in a committed transaction.
#[derive(Debug, Serialize)]
pub struct ChangeOutput {
    /// `added`, `changed` or `removed`.
    pub change: &'static str,
    /// Collection name.
    pub collection: String,
    /// Document ID.
    pub id: String,
    /// Changed fields; `null` marks a cleared field.
    pub fields: BTreeMap<String, Option<Value>>,
}

/// Converts a change batch into printable records.
pub fn change_outputs(changes: &DatabaseChanges) -> Vec<ChangeOutput> {
    changes
        .iter()
        .map(|details| ChangeOutput {
            change: match details.change_type() {
                ChangeType::Add => "added",
                ChangeType::Update => "changed",
                ChangeType::Remove => "removed",
            },
            collection: details.key().collection().to_string(),
            id: details.key().id().to_string(),
            fields: details.changed_fields(),
        })
        .collect()
}

/// Subscribes, prints the cached documents once ready and optionally keeps
/// printing changes until interrupted.
pub async fn run(
    client: &ClientHandle,
    name: &str,
    params: Vec<Value>,
    watch: bool,
) -> CliResult<()> {
    let id = client.subscribe(name, params).await?;
    debug!(%id, name, "subscription ready");

    let documents: Vec<DocumentOutput> = client
        .database()
        .enumerate_collections()
        .iter()
        .flat_map(|collection| collection.all_documents())
        .map(|doc| DocumentOutput::from(&doc))
        .collect();
    println!("{}", serde_json::to_string_pretty(&documents)?);

    if watch {
        let feed = client.database().subscribe();
        std::thread::spawn(move || {
            while let Ok(changes) = feed.recv() {
                for change in change_outputs(&changes) {
                    match serde_json::to_string(&change) {
                        Ok(line) => println!("{line}"),
                        Err(error) => debug!(%error, "failed to encode change"),
                    }
                }
            }
        });
        let _ = tokio::signal::ctrl_c().await;
    }

    client.unsubscribe(id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddp_core::{Database, DocumentKey};
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn changes_are_labelled_by_kind() {
        let db = Database::new();
        let feed = db.subscribe();
        let added = DocumentKey::new("lists", "a");
        let removed = DocumentKey::new("lists", "b");
        db.perform_updates(|txn| {
            txn.insert_document(removed.clone(), fields(json!({"name": "old"})))
                .unwrap();
        });
        feed.recv().unwrap();

        db.perform_updates(|txn| {
            txn.insert_document(added.clone(), fields(json!({"name": "new"})))
                .unwrap();
            txn.remove_document(&removed).unwrap();
        });
        let changes = feed.recv().unwrap();
        let outputs = change_outputs(&changes);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].change, "added");
        assert_eq!(outputs[0].id, "a");
        assert_eq!(outputs[0].fields.get("name"), Some(&Some(json!("new"))));
        assert_eq!(outputs[1].change, "removed");
        assert_eq!(outputs[1].id, "b");
    }
}
