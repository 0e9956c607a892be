//! Client observers.

use crate::account::Account;
use crate::client::ConnectionStatus;
use crate::error::ClientError;
use ddp_protocol::MethodError;
use parking_lot::Mutex;

/// Receives client-wide notifications.
///
/// Method and subscription failures are only reported to their own
/// handlers, never here. All methods have empty default implementations.
pub trait ClientObserver: Send + Sync {
    /// The connection status changed.
    fn status_changed(&self, _status: ConnectionStatus) {}

    /// The connection failed or was lost.
    fn connection_error(&self, _error: &ClientError) {}

    /// The logged-in account changed.
    fn account_changed(&self, _account: Option<&Account>) {}

    /// A login attempt failed.
    fn login_failed(&self, _error: &MethodError) {}
}

/// A notification captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// See [`ClientObserver::status_changed`].
    Status(ConnectionStatus),
    /// See [`ClientObserver::connection_error`].
    ConnectionError(ClientError),
    /// See [`ClientObserver::account_changed`].
    Account(Option<Account>),
    /// See [`ClientObserver::login_failed`].
    LoginFailed(MethodError),
}

/// An observer that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and forgets the recorded notifications.
    pub fn take(&self) -> Vec<ObserverEvent> {
        std::mem::take(&mut self.events.lock())
    }

    /// Returns the recorded status changes, in order.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObserverEvent::Status(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObserverEvent) {
        self.events.lock().push(event);
    }
}

impl ClientObserver for RecordingObserver {
    fn status_changed(&self, status: ConnectionStatus) {
        self.push(ObserverEvent::Status(status));
    }

    fn connection_error(&self, error: &ClientError) {
        self.push(ObserverEvent::ConnectionError(error.clone()));
    }

    fn account_changed(&self, account: Option<&Account>) {
        self.push(ObserverEvent::Account(account.cloned()));
    }

    fn login_failed(&self, error: &MethodError) {
        self.push(ObserverEvent::LoginFailed(error.clone()));
    }
}
