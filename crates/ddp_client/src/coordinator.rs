//! Method invocation coordinator.
//!
//! The coordinator owns every outstanding [`MethodInvocation`] and decides:
//! - when a method message may be sent (call order, barriers, revival)
//! - whether a server delta is applied now or buffered behind in-flight
//!   methods
//! - when a method is flushed, swapping its stub's optimistic writes for the
//!   server's authoritative state in one transaction
//!
//! ## Flushing
//!
//! A delta received while methods are awaiting `updated` is tagged with those
//! methods. Buffered deltas are applied in receipt order, and only once every
//! tagged method is done. A done method is flushed when no remaining buffered
//! delta carries its tag; flushing releases its claims on shadowed documents
//! (see `server_documents`).

use crate::data_update::DataUpdate;
use crate::error::ClientError;
use crate::invocation::{
    CallOptions, CallPurpose, CompletionHandler, MethodInvocation, MethodOutcome, ResultHandler,
};
use crate::server_documents::ServerDocuments;
use crate::stub::{StubContext, StubRegistry};
use ddp_core::Database;
use ddp_protocol::{random_seed, ClientMessage, RandomStream};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A method call about to be registered.
pub(crate) struct NewCall {
    pub(crate) name: String,
    pub(crate) params: Vec<Value>,
    pub(crate) options: CallOptions,
    pub(crate) purpose: CallPurpose,
    /// Goes to the front of the queue and ignores the revival barrier.
    pub(crate) urgent: bool,
    pub(crate) on_result: Option<ResultHandler>,
    pub(crate) on_complete: Option<CompletionHandler>,
}

impl NewCall {
    pub(crate) fn new(name: impl Into<String>, params: Vec<Value>, purpose: CallPurpose) -> Self {
        Self {
            name: name.into(),
            params,
            options: CallOptions::default(),
            purpose,
            urgent: false,
            on_result: None,
            on_complete: None,
        }
    }
}

#[derive(Debug)]
struct BufferedUpdate {
    update: DataUpdate,
    awaiting: BTreeSet<String>,
}

/// Tracks outstanding method invocations.
#[derive(Debug, Default)]
pub(crate) struct MethodCoordinator {
    invocations: Vec<MethodInvocation>,
    next_method_id: u64,
    buffer: Vec<BufferedUpdate>,
    server_documents: ServerDocuments,
}

impl MethodCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a call and runs its stub.
    ///
    /// Returns the method ID and, if requested, the stub's value.
    pub(crate) fn call(
        &mut self,
        call: NewCall,
        db: &Database,
        stubs: &StubRegistry,
        user_id: Option<&str>,
    ) -> (String, Option<Value>) {
        self.next_method_id += 1;
        let id = self.next_method_id.to_string();
        let seed = call.options.random_seed.clone().unwrap_or_else(random_seed);

        let mut invocation = MethodInvocation::new(
            id.clone(),
            call.name,
            call.params,
            seed,
            call.options.barrier || call.urgent,
            call.purpose,
            call.on_result,
            call.on_complete,
        );
        invocation.bypasses_revival = call.urgent;

        let mut stub_value = None;
        if let Some(stub) = stubs.get(&invocation.name) {
            let mut random = RandomStream::new(invocation.random_seed.clone());
            let params = &invocation.params;
            let outcome = db.transaction(|txn| {
                let mut ctx = StubContext::new(txn, &mut random, stubs, user_id);
                stub(&mut ctx, &params[..])
            });
            match outcome {
                Ok((value, changes)) => {
                    for details in &changes {
                        self.server_documents
                            .claim(details.key(), details.fields_before().cloned(), &id);
                    }
                    debug!(method = %invocation.name, id = %id, documents = changes.len(), "stub applied");
                    invocation.changes_performed_by_stub = Some(changes);
                    if call.options.return_stub_value {
                        stub_value = Some(value);
                    }
                }
                Err(error) => {
                    let error = ClientError::Stub {
                        method: invocation.name.clone(),
                        error,
                    };
                    warn!(id = %id, %error, "calling without simulation");
                }
            }
        }

        if call.urgent {
            self.invocations.insert(0, invocation);
        } else {
            self.invocations.push(invocation);
        }
        (id, stub_value)
    }

    /// Marks every method that may go out now as sent and returns its
    /// message.
    ///
    /// Methods go out in call order. A barrier waits for every earlier method
    /// to be flushed and holds back every later one until it is flushed
    /// itself. While `revival_pending`, only urgent methods are sent.
    pub(crate) fn drain_sendable(&mut self, revival_pending: bool) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        let mut earlier_unflushed = false;

        for invocation in &mut self.invocations {
            if !invocation.message_sent {
                if revival_pending && !invocation.bypasses_revival {
                    break;
                }
                if invocation.barrier && earlier_unflushed {
                    break;
                }
                invocation.message_sent = true;
                messages.push(invocation.to_message());
            }
            if invocation.updates_flushed {
                continue;
            }
            if invocation.barrier {
                break;
            }
            earlier_unflushed = true;
        }
        messages
    }

    /// Returns the purpose of a method still waiting for its result.
    pub(crate) fn awaiting_result(&self, id: &str) -> Option<CallPurpose> {
        self.find(id)
            .filter(|invocation| !invocation.result_received())
            .map(|invocation| invocation.purpose)
    }

    pub(crate) fn handle_result(&mut self, id: &str, outcome: MethodOutcome) {
        let Some(invocation) = self.find_mut(id) else {
            warn!(id, "result for unknown method");
            return;
        };
        if !invocation.receive_result(outcome) {
            debug!(id, "ignoring duplicate result");
            return;
        }
        self.complete_finished();
    }

    /// Applies a server delta, or buffers it behind in-flight methods.
    pub(crate) fn handle_data(&mut self, update: DataUpdate, db: &Database) {
        let awaiting: BTreeSet<String> = self
            .invocations
            .iter()
            .filter(|invocation| invocation.message_sent && !invocation.updates_done)
            .map(|invocation| invocation.id.clone())
            .collect();

        if awaiting.is_empty() && self.buffer.is_empty() {
            let server_documents = &mut self.server_documents;
            db.perform_updates(|txn| server_documents.apply(&update, txn));
        } else {
            debug!(key = %update.key(), methods = awaiting.len(), "buffering update");
            self.buffer.push(BufferedUpdate { update, awaiting });
        }
    }

    pub(crate) fn handle_updated(&mut self, ids: &[String], db: &Database) {
        for id in ids {
            match self.find_mut(id) {
                Some(invocation) => invocation.updates_done = true,
                None => warn!(id = %id, "updated for unknown method"),
            }
        }
        self.flush(db);
    }

    fn is_done(&self, id: &str) -> bool {
        self.find(id).map_or(true, |invocation| invocation.updates_done)
    }

    /// Applies every buffered delta whose methods are all done and flushes
    /// every done method no longer referenced by the buffer, in one
    /// transaction.
    fn flush(&mut self, db: &Database) {
        let ready = self
            .buffer
            .iter()
            .take_while(|entry| entry.awaiting.iter().all(|id| self.is_done(id)))
            .count();

        let flushing: Vec<String> = {
            let blocked: BTreeSet<&String> = self.buffer[ready..]
                .iter()
                .flat_map(|entry| entry.awaiting.iter())
                .collect();
            self.invocations
                .iter()
                .filter(|i| i.updates_done && !i.updates_flushed && !blocked.contains(&i.id))
                .map(|i| i.id.clone())
                .collect()
        };

        if ready == 0 && flushing.is_empty() {
            return;
        }

        let updates: Vec<BufferedUpdate> = self.buffer.drain(..ready).collect();
        let server_documents = &mut self.server_documents;
        db.perform_updates(|txn| {
            for entry in &updates {
                server_documents.apply(&entry.update, txn);
            }
            for id in &flushing {
                for (key, fields) in server_documents.release(id) {
                    txn.replace_document(&key, fields);
                }
            }
        });

        for invocation in &mut self.invocations {
            if flushing.contains(&invocation.id) {
                invocation.updates_flushed = true;
                let simulated = invocation
                    .changes_performed_by_stub
                    .as_ref()
                    .map_or(0, |changes| changes.len());
                debug!(id = %invocation.id, method = %invocation.name, simulated, "method flushed");
            }
        }
        self.complete_finished();
    }

    /// Removes complete invocations and runs their completion handlers.
    fn complete_finished(&mut self) {
        let (complete, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.invocations)
            .into_iter()
            .partition(MethodInvocation::is_complete);
        self.invocations = pending;
        for invocation in complete {
            invocation.complete();
        }
    }

    /// Prepares every outstanding method for a new connection.
    ///
    /// Buffered deltas from the old connection are dropped. Each invocation
    /// will be sent again with the same ID and seed; unflushed ones wait for
    /// a fresh `updated`. Stubs are not run again.
    pub(crate) fn reset_for_reconnect(&mut self) {
        if !self.buffer.is_empty() {
            debug!(count = self.buffer.len(), "discarding buffered updates");
        }
        self.buffer.clear();
        for invocation in &mut self.invocations {
            invocation.message_sent = false;
            if !invocation.updates_flushed {
                invocation.updates_done = false;
            }
        }
    }

    /// Number of outstanding invocations.
    pub(crate) fn len(&self) -> usize {
        self.invocations.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn has_unflushed_stub_writes(&self) -> bool {
        self.server_documents.len() > 0
    }

    fn find(&self, id: &str) -> Option<&MethodInvocation> {
        self.invocations.iter().find(|invocation| invocation.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut MethodInvocation> {
        self.invocations.iter_mut().find(|invocation| invocation.id == id)
    }
}
