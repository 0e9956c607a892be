//! Change feed for observing committed transactions.
//!
//! The change feed emits one `DatabaseChanges` per outermost transaction that
//! produced a net change, enabling:
//! - Reactive UI updates
//! - Persistence adapters that project the cache onto another store
//! - Catch-up polling by sequence number
//!
//! # Usage
//!
//! ```rust,ignore
//! let db = Database::new();
//! let receiver = db.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(changes) = receiver.recv() {
//!         println!("{} documents changed", changes.len());
//!     }
//! });
//! ```

use crate::changes::DatabaseChanges;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Distributes committed changes to subscribers.
///
/// The change feed:
/// - Emits only committed changes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Is thread-safe
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<Arc<DatabaseChanges>>>>,
    history: RwLock<Vec<Arc<DatabaseChanges>>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to the change feed.
    ///
    /// The receiver gets every notification emitted after this call.
    pub fn subscribe(&self) -> Receiver<Arc<DatabaseChanges>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a notification to all subscribers.
    pub fn emit(&self, changes: Arc<DatabaseChanges>) {
        {
            let mut history = self.history.write();
            history.push(Arc::clone(&changes));
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        // Drop disconnected subscribers while sending
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(Arc::clone(&changes)).is_ok());
    }

    /// Returns notifications with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<Arc<DatabaseChanges>> {
        let history = self.history.read();
        history
            .iter()
            .filter(|c| c.sequence() > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest sequence number in history.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map(|c| c.sequence()).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of notifications kept in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
