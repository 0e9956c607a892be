//! Subscription lifecycle.
//!
//! ```text
//! Pending --sub sent--> Subscribed --ready--> Ready
//!    ^                      |                   |
//!    +------ reconnect -----+-------------------+
//!
//! any --nosub / last unsubscribe--> terminated (forgotten)
//! ```
//!
//! Subscriptions with the same name and parameters share one server
//! subscription. After a reconnect every subscription that was live is sent
//! again with its old ID; until all of them are ready again the client is
//! "reviving" and holds back queued methods.

use ddp_protocol::{ClientMessage, MethodError};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

/// Called once a subscription is ready, or with the error that ended it.
pub type SubscriptionHandler = Box<dyn FnOnce(Result<(), MethodError>) + Send>;

/// State of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Not yet sent on the current connection.
    Pending,
    /// `sub` sent, waiting for `ready`.
    Subscribed,
    /// The server finished sending the initial data set.
    Ready,
}

struct Subscription {
    id: String,
    name: String,
    params: Vec<Value>,
    key: (String, String),
    status: SubscriptionStatus,
    ref_count: usize,
    sent: bool,
    handlers: Vec<SubscriptionHandler>,
}

impl Subscription {
    fn to_message(&self) -> ClientMessage {
        ClientMessage::Sub {
            id: self.id.clone(),
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }

    fn notify(&mut self, outcome: &Result<(), MethodError>) {
        for handler in self.handlers.drain(..) {
            handler(outcome.clone());
        }
    }
}

/// Tracks subscriptions by ID, in the order they were added.
#[derive(Default)]
pub(crate) struct SubscriptionManager {
    subscriptions: Vec<Subscription>,
    by_key: HashMap<(String, String), String>,
    reviving: BTreeSet<String>,
}

impl SubscriptionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn dedup_key(name: &str, params: &[Value]) -> (String, String) {
        // serde_json maps are sorted, so this is canonical
        let params = serde_json::to_string(params).unwrap_or_default();
        (name.to_string(), params)
    }

    /// Adds a subscription, or another reference to an identical live one.
    ///
    /// Returns the subscription ID. If the shared subscription is already
    /// ready, `handler` runs before this returns.
    pub(crate) fn add(
        &mut self,
        name: &str,
        params: Vec<Value>,
        handler: Option<SubscriptionHandler>,
    ) -> String {
        let key = Self::dedup_key(name, &params);
        if let Some(id) = self.by_key.get(&key).cloned() {
            if let Some(sub) = self.find_mut(&id) {
                sub.ref_count += 1;
                debug!(id = %id, name, refs = sub.ref_count, "sharing subscription");
                if let Some(handler) = handler {
                    if sub.status == SubscriptionStatus::Ready {
                        handler(Ok(()));
                    } else {
                        sub.handlers.push(handler);
                    }
                }
                return id;
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        debug!(id = %id, name, "adding subscription");
        self.by_key.insert(key.clone(), id.clone());
        self.subscriptions.push(Subscription {
            id: id.clone(),
            name: name.to_string(),
            params,
            key,
            status: SubscriptionStatus::Pending,
            ref_count: 1,
            sent: false,
            handlers: handler.into_iter().collect(),
        });
        id
    }

    /// Drops one reference. Returns the `unsub` to send when the last
    /// reference went away and the server knows the subscription.
    ///
    /// Documents the subscription delivered stay in the cache.
    pub(crate) fn remove(&mut self, id: &str) -> Option<ClientMessage> {
        let Some(sub) = self.find_mut(id) else {
            warn!(id, "remove for unknown subscription");
            return None;
        };
        sub.ref_count = sub.ref_count.saturating_sub(1);
        if sub.ref_count > 0 {
            return None;
        }

        let sub = self.take(id)?;
        debug!(id, name = %sub.name, "subscription removed");
        sub.sent.then(|| ClientMessage::Unsub { id: sub.id })
    }

    /// Marks every pending subscription as sent and returns its `sub`.
    pub(crate) fn drain_sendable(&mut self) -> Vec<ClientMessage> {
        self.subscriptions
            .iter_mut()
            .filter(|sub| sub.status == SubscriptionStatus::Pending)
            .map(|sub| {
                sub.status = SubscriptionStatus::Subscribed;
                sub.sent = true;
                sub.to_message()
            })
            .collect()
    }

    pub(crate) fn handle_ready(&mut self, ids: &[String]) {
        for id in ids {
            self.reviving.remove(id);
            match self.find_mut(id) {
                Some(sub) => {
                    sub.status = SubscriptionStatus::Ready;
                    sub.notify(&Ok(()));
                }
                None => warn!(id = %id, "ready for unknown subscription"),
            }
        }
    }

    pub(crate) fn handle_nosub(&mut self, id: &str, error: Option<MethodError>) {
        self.reviving.remove(id);
        let Some(mut sub) = self.take(id) else {
            debug!(id, "nosub for unknown subscription");
            return;
        };
        let error = error.unwrap_or_else(|| MethodError::new("stopped", "Subscription stopped"));
        warn!(id, name = %sub.name, %error, "subscription terminated");
        sub.notify(&Err(error));
    }

    /// Moves every live subscription back to Pending for a new connection
    /// and starts the revival barrier.
    pub(crate) fn prepare_revival(&mut self) {
        self.reviving.clear();
        for sub in &mut self.subscriptions {
            if matches!(sub.status, SubscriptionStatus::Subscribed | SubscriptionStatus::Ready) {
                sub.status = SubscriptionStatus::Pending;
                self.reviving.insert(sub.id.clone());
            }
            sub.sent = false;
        }
        if !self.reviving.is_empty() {
            debug!(count = self.reviving.len(), "subscriptions awaiting revival");
        }
    }

    /// Whether revived subscriptions are still waiting for `ready`.
    pub(crate) fn is_reviving(&self) -> bool {
        !self.reviving.is_empty()
    }

    /// `None` once the subscription has terminated.
    pub(crate) fn status(&self, id: &str) -> Option<SubscriptionStatus> {
        self.find(id).map(|sub| sub.status)
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    fn find(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|sub| sub.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Subscription> {
        self.subscriptions.iter_mut().find(|sub| sub.id == id)
    }

    fn take(&mut self, id: &str) -> Option<Subscription> {
        let index = self.subscriptions.iter().position(|sub| sub.id == id)?;
        let sub = self.subscriptions.remove(index);
        self.by_key.remove(&sub.key);
        // Nothing answers for an unsubscribed id
        self.reviving.remove(id);
        Some(sub)
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscriptions.len())
            .field("reviving", &self.reviving)
            .finish()
    }
}
