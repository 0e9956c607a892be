//! # DDP Core
//!
//! Reactive document cache for the DDP client.
//!
//! This crate provides:
//! - `Database`, the root owner of all collections
//! - Scoped transactions with exactly one coalesced notification per
//!   outermost transaction
//! - `DatabaseChanges` / `DocumentChangeDetails` describing every change as a
//!   reversible before/after pair
//! - A change feed for observers (UI layers, persistence adapters)
//!
//! ## Key Invariants
//!
//! - Documents are only mutated inside a transaction
//! - Transactions from different threads are serialized, never interleaved
//! - Nested transactions are absorbed by the outermost one
//! - A transaction with no net change emits nothing
//!
//! ## Usage
//!
//! ```
//! use ddp_core::{Database, DocumentKey, Fields, FetchRequest};
//! use serde_json::json;
//!
//! let db = Database::new();
//! let changes = db.subscribe();
//!
//! db.perform_updates(|txn| {
//!     let mut fields = Fields::new();
//!     fields.insert("title".into(), json!("Buy milk"));
//!     txn.insert_document(DocumentKey::new("tasks", "t1"), fields)
//! })
//! .unwrap();
//!
//! assert_eq!(db.execute_fetch(&FetchRequest::all("tasks")).len(), 1);
//! assert_eq!(changes.try_recv().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod changes;
mod collection;
mod database;
mod document;
mod error;
mod transaction;
mod types;

pub use change_feed::ChangeFeed;
pub use changes::{ChangeType, DatabaseChanges, DocumentChangeDetails};
pub use collection::{Collection, Collections};
pub use database::{Database, FetchRequest, Selector};
pub use document::{merge_fields, Document};
pub use error::{CoreError, CoreResult};
pub use transaction::Transaction;
pub use types::{DocumentId, DocumentKey, Fields, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
