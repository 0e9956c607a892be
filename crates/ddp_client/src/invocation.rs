//! Method invocations.

use ddp_core::DatabaseChanges;
use ddp_protocol::{ClientMessage, MethodError};
use serde_json::Value;

/// Outcome of a method: its return value or the server's error.
pub type MethodOutcome = Result<Value, MethodError>;

/// Called as soon as the method's result arrives.
pub type ResultHandler = Box<dyn FnOnce(&MethodOutcome) + Send>;

/// Called once the result has arrived and the method's writes are visible.
pub type CompletionHandler = Box<dyn FnOnce(MethodOutcome) + Send>;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Wait for all earlier methods to be flushed before sending, and hold
    /// back every later method until this one is flushed.
    pub barrier: bool,
    /// Return the stub's value from `call`.
    pub return_stub_value: bool,
    /// Use this random seed instead of a fresh one.
    pub random_seed: Option<String>,
}

impl CallOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the call as a barrier.
    pub fn barrier(mut self) -> Self {
        self.barrier = true;
        self
    }

    /// Requests the stub's return value.
    pub fn return_stub_value(mut self) -> Self {
        self.return_stub_value = true;
        self
    }

    /// Sets the random seed.
    pub fn with_random_seed(mut self, seed: impl Into<String>) -> Self {
        self.random_seed = Some(seed.into());
        self
    }
}

/// What a call returns immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct CallHandle {
    /// Method ID used on the wire.
    pub method_id: String,
    /// The stub's value, if requested and the stub succeeded.
    pub stub_value: Option<Value>,
}

/// Why the client itself issued a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallPurpose {
    User,
    Login,
    ResumeLogin,
    Logout,
}

/// State of one method call from invocation until completion.
pub(crate) struct MethodInvocation {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) params: Vec<Value>,
    pub(crate) random_seed: String,
    pub(crate) barrier: bool,
    pub(crate) bypasses_revival: bool,
    pub(crate) purpose: CallPurpose,
    pub(crate) changes_performed_by_stub: Option<DatabaseChanges>,
    pub(crate) message_sent: bool,
    pub(crate) result: Option<MethodOutcome>,
    pub(crate) updates_done: bool,
    pub(crate) updates_flushed: bool,
    received_result_handler: Option<ResultHandler>,
    completion_handler: Option<CompletionHandler>,
}

impl MethodInvocation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        name: String,
        params: Vec<Value>,
        random_seed: String,
        barrier: bool,
        purpose: CallPurpose,
        received_result_handler: Option<ResultHandler>,
        completion_handler: Option<CompletionHandler>,
    ) -> Self {
        Self {
            id,
            name,
            params,
            random_seed,
            barrier,
            bypasses_revival: false,
            purpose,
            changes_performed_by_stub: None,
            message_sent: false,
            result: None,
            updates_done: false,
            updates_flushed: false,
            received_result_handler,
            completion_handler,
        }
    }

    pub(crate) fn to_message(&self) -> ClientMessage {
        ClientMessage::Method {
            id: self.id.clone(),
            method: self.name.clone(),
            params: self.params.clone(),
            random_seed: Some(self.random_seed.clone()),
        }
    }

    pub(crate) fn result_received(&self) -> bool {
        self.result.is_some()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.result_received() && self.updates_flushed
    }

    /// Stores the result and runs the result handler. A second result for
    /// the same invocation is ignored.
    pub(crate) fn receive_result(&mut self, outcome: MethodOutcome) -> bool {
        if self.result.is_some() {
            return false;
        }
        if let Some(handler) = self.received_result_handler.take() {
            handler(&outcome);
        }
        self.result = Some(outcome);
        true
    }

    /// Runs the completion handler. Only meaningful once complete.
    pub(crate) fn complete(mut self) {
        if let (Some(handler), Some(outcome)) = (self.completion_handler.take(), self.result.take()) {
            handler(outcome);
        }
    }
}

impl std::fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("barrier", &self.barrier)
            .field("message_sent", &self.message_sent)
            .field("result_received", &self.result_received())
            .field("updates_done", &self.updates_done)
            .field("updates_flushed", &self.updates_flushed)
            .finish()
    }
}
