//! # DDP Client
//!
//! Client engine for the DDP publish/subscribe and RPC protocol.
//!
//! This crate provides:
//! - Connection state machine (handshake, heartbeat, reconnect)
//! - Method calls with latency compensation (stubs, buffered server
//!   writes, atomic reconciliation)
//! - Subscription lifecycle with revival after reconnect
//! - Resume-token logins and credential storage
//! - Collection mutators with client-generated IDs
//! - A tokio driver with cloneable handles
//!
//! ## Architecture
//!
//! [`DdpClient`] is a synchronous state machine over a [`Transport`]. It owns
//! a shared [`ddp_core::Database`] that mirrors the server's documents. A
//! method call runs its stub against the cache right away; server writes
//! caused by the method are held back until the server reports them all
//! (`updated`), then swapped in for the stub's writes in one transaction.
//!
//! ## Key Invariants
//!
//! - Method messages are sent in call order
//! - A barrier method runs alone
//! - No queued method is sent while revived subscriptions are not ready
//! - After a method is flushed, the cache matches the server whether or not
//!   a stub ran

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod client;
mod clock;
mod config;
mod coordinator;
mod data_update;
mod error;
mod heartbeat;
mod invocation;
mod mutators;
mod observer;
mod runtime;
mod server_documents;
mod stub;
mod subscriptions;
mod transport;

pub use account::{Account, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use client::{ConnectionStatus, DdpClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffConfig, ClientConfig, ReconnectPolicy};
pub use error::{ClientError, ClientResult};
pub use invocation::{
    CallHandle, CallOptions, CompletionHandler, MethodOutcome, ResultHandler,
};
pub use observer::{ClientObserver, ObserverEvent, RecordingObserver};
pub use runtime::{spawn, ClientHandle};
pub use stub::{MethodStub, StubContext, StubRegistry, StubResult};
pub use subscriptions::{SubscriptionHandler, SubscriptionStatus};
pub use transport::{MockTransport, Transport, TransportEvent};
