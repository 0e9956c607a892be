//! Transport layer abstraction.

use crate::error::{ClientError, ClientResult};
use ddp_protocol::{decode_client, ClientMessage};
use parking_lot::Mutex;
use std::sync::Arc;

/// A message-oriented connection to the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket, mock for testing, etc.). Calls never block:
/// the outcome of `open` and everything received afterwards is reported back
/// to the client as [`TransportEvent`]s.
pub trait Transport: Send {
    /// Starts opening the connection.
    fn open(&mut self) -> ClientResult<()>;

    /// Closes the connection. Closing a closed transport does nothing.
    fn close(&mut self);

    /// Sends one text frame.
    fn send(&mut self, frame: String) -> ClientResult<()>;
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection failed.
    Error(String),
    /// The connection closed.
    Closed,
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    open_calls: usize,
    close_calls: usize,
    sent: Vec<String>,
    fail_open: Option<String>,
}

/// A mock transport for testing.
///
/// Clones share state, so a test can keep one clone while the client owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `open` calls fail with `reason`.
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state.lock().fail_open = Some(reason.into());
    }

    /// Lets `open` succeed again.
    pub fn allow_open(&self) {
        self.state.lock().fail_open = None;
    }

    /// Returns true between a successful `open` and `close`.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of `open` calls.
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    /// Number of `close` calls.
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Returns and forgets every frame sent so far.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Returns and forgets every frame sent so far, decoded.
    pub fn take_messages(&self) -> Vec<ClientMessage> {
        self.take_sent()
            .iter()
            .filter_map(|frame| decode_client(frame).ok())
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if let Some(reason) = &state.fail_open {
            return Err(ClientError::transport_retryable(reason.clone()));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.open = false;
    }

    fn send(&mut self, frame: String) -> ClientResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ClientError::NotConnected);
        }
        state.sent.push(frame);
        Ok(())
    }
}
