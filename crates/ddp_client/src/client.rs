//! The client state machine.
//!
//! ```text
//!            connect()            connected
//! Offline ------------> Connecting ---------> Connected
//!    ^                  |    ^                    |
//!    |          failed  |    | reconnect timer    | drop / timeout /
//!    |                  v    |                    | protocol error
//!    |               Failed  +----- Waiting <-----+
//!    |                                 |
//!    +------- policy gives up ---------+
//! ```
//!
//! [`DdpClient`] never blocks and never spawns. It is driven by three
//! inputs: transport events ([`DdpClient::handle_transport_event`]), calls
//! from the application, and [`DdpClient::poll_timers`]. The `runtime`
//! module wires these to a tokio task.

use crate::account::{Account, CredentialStore, MemoryCredentialStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::coordinator::{MethodCoordinator, NewCall};
use crate::data_update::DataUpdate;
use crate::error::{ClientError, ClientResult};
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::invocation::{
    CallHandle, CallOptions, CallPurpose, CompletionHandler, MethodOutcome, ResultHandler,
};
use crate::mutators::{self, Mutator};
use crate::observer::ClientObserver;
use crate::stub::{StubContext, StubRegistry, StubResult};
use crate::subscriptions::{SubscriptionHandler, SubscriptionManager, SubscriptionStatus};
use crate::transport::{Transport, TransportEvent};
use ddp_core::{Database, DocumentId, Fields};
use ddp_protocol::{decode_server, encode, random_seed, ClientMessage, RandomStream, ServerMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The connection status of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying to.
    Offline,
    /// Opening the transport or waiting for the handshake.
    Connecting,
    /// Session established.
    Connected,
    /// Connection lost, waiting to reconnect.
    Waiting,
    /// The server refused every offered protocol version.
    Failed,
}

impl ConnectionStatus {
    /// Returns true if a session is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Returns true if `connect` would start a connection attempt.
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionStatus::Offline | ConnectionStatus::Waiting)
    }

    fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Waiting => "waiting",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A DDP client.
pub struct DdpClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    transport_open: bool,
    clock: Arc<dyn Clock>,
    database: Arc<Database>,
    status: ConnectionStatus,
    session_id: Option<String>,
    last_session_id: Option<String>,
    heartbeat: Heartbeat,
    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    reconnect_attempt: u32,
    reconnect_policy: Box<dyn ReconnectPolicy>,
    methods: MethodCoordinator,
    subscriptions: SubscriptionManager,
    stubs: StubRegistry,
    account: Option<Account>,
    credentials: Box<dyn CredentialStore>,
    logging_in: bool,
    observers: Vec<Arc<dyn ClientObserver>>,
}

impl<T: Transport> DdpClient<T> {
    /// Creates an offline client with an empty cache.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat_interval, config.heartbeat_timeout);
        let reconnect_policy = Box::new(config.reconnect.clone());
        Self {
            config,
            transport,
            transport_open: false,
            clock: Arc::new(SystemClock),
            database: Arc::new(Database::new()),
            status: ConnectionStatus::Offline,
            session_id: None,
            last_session_id: None,
            heartbeat,
            connect_deadline: None,
            reconnect_at: None,
            reconnect_attempt: 0,
            reconnect_policy,
            methods: MethodCoordinator::new(),
            subscriptions: SubscriptionManager::new(),
            stubs: StubRegistry::new(),
            account: None,
            credentials: Box::new(MemoryCredentialStore::new()),
            logging_in: false,
            observers: Vec::new(),
        }
    }

    /// Uses `clock` for timers and credential expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses an existing cache.
    #[must_use]
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = database;
        self
    }

    /// Uses `policy` instead of the configured back-off.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect_policy = Box::new(policy);
        self
    }

    /// Uses `store` for credentials and loads the account saved in it.
    #[must_use]
    pub fn with_credential_store(mut self, store: impl CredentialStore + 'static) -> Self {
        self.account = match store.load() {
            Ok(account) => account,
            Err(error) => {
                warn!(%error, "could not load saved account");
                None
            }
        };
        self.credentials = Box::new(store);
        self
    }

    /// Returns the connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Returns the current session ID.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the document cache.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Returns the logged-in account.
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Returns true while a login is in flight.
    pub fn is_logging_in(&self) -> bool {
        self.logging_in
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of method calls not yet complete.
    pub fn pending_methods(&self) -> usize {
        self.methods.len()
    }

    /// Returns the status of a subscription.
    pub fn subscription_status(&self, id: &str) -> Option<SubscriptionStatus> {
        self.subscriptions.status(id)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Registers an observer.
    pub fn add_observer(&mut self, observer: Arc<dyn ClientObserver>) {
        self.observers.push(observer);
    }

    /// Registers a stub for `name`.
    pub fn define_stub<F>(&mut self, name: impl Into<String>, stub: F)
    where
        F: Fn(&mut StubContext<'_, '_>, &[Value]) -> StubResult + Send + Sync + 'static,
    {
        self.stubs.define(name, stub);
    }

    /// Removes the stub for `name`.
    pub fn remove_stub(&mut self, name: &str) -> bool {
        self.stubs.remove(name)
    }

    // ---- connection ----

    /// Starts connecting. Does nothing unless Offline or Waiting.
    pub fn connect(&mut self) {
        if !self.status.can_connect() {
            debug!(status = %self.status, "connect ignored");
            return;
        }
        if self.status == ConnectionStatus::Offline {
            self.reconnect_attempt = 0;
        }
        self.reconnect_at = None;
        self.open_transport();
    }

    /// Closes the connection and stops reconnecting.
    ///
    /// Outstanding methods and subscriptions are kept and resume on the next
    /// [`connect`](Self::connect).
    pub fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Offline {
            return;
        }
        info!("disconnecting");
        self.tear_down();
        self.set_status(ConnectionStatus::Offline);
    }

    fn open_transport(&mut self) {
        self.set_status(ConnectionStatus::Connecting);
        self.connect_deadline = Some(self.clock.now() + self.config.connect_timeout);
        debug!(url = %self.config.server_url, "opening transport");
        if let Err(error) = self.transport.open() {
            self.connection_lost(error);
        }
    }

    /// Closes the transport and prepares methods and subscriptions for the
    /// next connection.
    fn tear_down(&mut self) {
        self.transport.close();
        self.transport_open = false;
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.reconnect_at = None;
        self.session_id = None;
        self.methods.reset_for_reconnect();
        self.subscriptions.prepare_revival();
    }

    fn connection_lost(&mut self, error: ClientError) {
        if !self.status.is_live() {
            debug!(%error, status = %self.status, "ignoring error while not connected");
            return;
        }
        warn!(%error, "connection lost");
        self.tear_down();
        self.notify(|observer| observer.connection_error(&error));

        if !error.is_retryable() {
            self.set_status(ConnectionStatus::Offline);
            return;
        }
        match self.reconnect_policy.next_delay(self.reconnect_attempt) {
            Some(delay) => {
                self.reconnect_attempt += 1;
                self.reconnect_at = Some(self.clock.now() + delay);
                info!(attempt = self.reconnect_attempt, ?delay, "scheduling reconnect");
                self.set_status(ConnectionStatus::Waiting);
            }
            None => {
                warn!(attempts = self.reconnect_attempt, "giving up reconnecting");
                self.set_status(ConnectionStatus::Offline);
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        info!(from = %self.status, to = %status, "connection status changed");
        self.status = status;
        self.notify(|observer| observer.status_changed(status));
    }

    fn notify(&self, f: impl Fn(&dyn ClientObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    // ---- inbound ----

    /// Handles something that happened on the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.status != ConnectionStatus::Connecting {
                    debug!(status = %self.status, "ignoring transport open");
                    return;
                }
                self.transport_open = true;
                let connect = ClientMessage::Connect {
                    version: self.config.preferred_version().to_string(),
                    support: self.config.supported_versions.clone(),
                    session: self.last_session_id.clone(),
                };
                if let Err(error) = self.send(connect) {
                    self.connection_lost(error);
                }
            }
            TransportEvent::Message(frame) => {
                if !self.transport_open {
                    debug!("ignoring frame on closed transport");
                    return;
                }
                self.heartbeat.record_message(self.clock.now());
                match decode_server(&frame) {
                    Ok(message) => self.handle_message(message),
                    Err(error) => self.connection_lost(error.into()),
                }
            }
            TransportEvent::Error(reason) => {
                self.connection_lost(ClientError::transport_retryable(reason));
            }
            TransportEvent::Closed => {
                self.connection_lost(ClientError::transport_retryable("connection closed"));
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { session } => self.handle_connected(session),
            ServerMessage::Failed { version } => self.handle_failed(version),
            ServerMessage::Ping { id } => {
                if let Err(error) = self.send(ClientMessage::Pong { id }) {
                    self.connection_lost(error);
                }
            }
            ServerMessage::Pong { .. } => {}
            ServerMessage::Result { id, result, error } => {
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if let Some(purpose) = self.methods.awaiting_result(&id) {
                    self.handle_account_result(purpose, &outcome);
                }
                self.methods.handle_result(&id, outcome);
                self.flush_outgoing();
            }
            ServerMessage::Updated { methods } => {
                self.methods.handle_updated(&methods, &self.database);
                self.flush_outgoing();
            }
            ServerMessage::Ready { subs } => {
                self.subscriptions.handle_ready(&subs);
                self.flush_outgoing();
            }
            ServerMessage::Nosub { id, error } => {
                self.subscriptions.handle_nosub(&id, error);
                self.flush_outgoing();
            }
            ServerMessage::Error {
                reason,
                offending_message,
            } => {
                warn!(%reason, offending = ?offending_message, "server reported an error");
            }
            ServerMessage::Unknown => debug!("ignoring unknown message"),
            data => {
                if let Some(update) = DataUpdate::from_message(data) {
                    self.methods.handle_data(update, &self.database);
                }
            }
        }
    }

    fn handle_connected(&mut self, session: String) {
        if self.status != ConnectionStatus::Connecting {
            warn!(status = %self.status, "unexpected connected message");
            return;
        }
        info!(session = %session, "session established");
        self.session_id = Some(session.clone());
        self.last_session_id = Some(session);
        self.connect_deadline = None;
        self.reconnect_attempt = 0;
        self.heartbeat.start(self.clock.now());
        self.set_status(ConnectionStatus::Connected);

        if let Some(account) = self.account.clone() {
            if account.is_expired(self.clock.unix_millis()) {
                info!(user = %account.user_id, "saved login expired");
                self.set_account(None);
            } else {
                debug!(user = %account.user_id, "resuming login");
                self.logging_in = true;
                let mut call = NewCall::new("login", account.resume_params(), CallPurpose::ResumeLogin);
                call.urgent = true;
                self.register_call(call);
            }
        }
        self.flush_outgoing();
    }

    fn handle_failed(&mut self, version: String) {
        let error = ClientError::VersionMismatch {
            offered: self.config.supported_versions.clone(),
            server: version,
        };
        warn!(%error, "handshake failed");
        self.transport.close();
        self.transport_open = false;
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.set_status(ConnectionStatus::Failed);
        self.notify(|observer| observer.connection_error(&error));
    }

    fn handle_account_result(&mut self, purpose: CallPurpose, outcome: &MethodOutcome) {
        match (purpose, outcome) {
            (CallPurpose::User, _) => {}
            (CallPurpose::Login | CallPurpose::ResumeLogin, Ok(result)) => {
                self.logging_in = false;
                match Account::from_login_result(result) {
                    Some(account) => {
                        info!(user = %account.user_id, "logged in");
                        self.set_account(Some(account));
                    }
                    None => warn!("login result carries no token"),
                }
            }
            (CallPurpose::Login | CallPurpose::ResumeLogin, Err(error)) => {
                self.logging_in = false;
                warn!(%error, "login failed");
                if self.account.is_some() {
                    self.set_account(None);
                }
                self.notify(|observer| observer.login_failed(error));
            }
            (CallPurpose::Logout, _) => {
                info!("logged out");
                self.set_account(None);
            }
        }
    }

    fn set_account(&mut self, account: Option<Account>) {
        let stored = match &account {
            Some(account) => self.credentials.save(account),
            None => self.credentials.clear(),
        };
        if let Err(error) = stored {
            warn!(%error, "could not update saved account");
        }
        self.account = account;
        let account = self.account.clone();
        self.notify(|observer| observer.account_changed(account.as_ref()));
    }

    // ---- outbound ----

    /// Sends one message if the connection allows it.
    ///
    /// Handshake messages only need an open transport. Everything else waits
    /// with its owner until a session exists.
    fn send(&mut self, message: ClientMessage) -> ClientResult<()> {
        let allowed = if message.is_session_control() {
            self.transport_open
        } else {
            self.status.is_connected()
        };
        if !allowed {
            debug!(kind = message.kind(), "not sending while disconnected");
            return Ok(());
        }
        let frame = encode(&message)?;
        debug!(kind = message.kind(), "sending");
        self.transport.send(frame)
    }

    /// Sends whatever methods and subscriptions may go out now.
    ///
    /// Urgent methods (the resume login) go first, then subscriptions, then
    /// queued methods once every revived subscription is ready.
    fn flush_outgoing(&mut self) {
        if !self.status.is_connected() {
            return;
        }
        let mut outgoing = self.methods.drain_sendable(true);
        outgoing.extend(self.subscriptions.drain_sendable());
        if !self.subscriptions.is_reviving() {
            outgoing.extend(self.methods.drain_sendable(false));
        }
        for message in outgoing {
            if let Err(error) = self.send(message) {
                self.connection_lost(error);
                return;
            }
        }
    }

    // ---- timers ----

    /// Fires every timer that is due.
    pub fn poll_timers(&mut self) {
        let now = self.clock.now();

        if self.status == ConnectionStatus::Connecting
            && self.connect_deadline.is_some_and(|at| now >= at)
        {
            warn!("connection attempt timed out");
            self.connection_lost(ClientError::Timeout);
        }

        if self.status == ConnectionStatus::Connected {
            match self.heartbeat.check(now) {
                HeartbeatAction::Ok => {}
                HeartbeatAction::SendPing => {
                    debug!("sending heartbeat ping");
                    if let Err(error) = self.send(ClientMessage::Ping { id: None }) {
                        self.connection_lost(error);
                    }
                }
                HeartbeatAction::TimedOut => {
                    warn!("heartbeat timed out");
                    self.connection_lost(ClientError::Timeout);
                }
            }
        }

        if self.status == ConnectionStatus::Waiting && self.reconnect_at.is_some_and(|at| now >= at) {
            self.reconnect_at = None;
            info!(attempt = self.reconnect_attempt, "reconnecting");
            self.open_transport();
        }
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        let heartbeat = if self.status.is_connected() {
            self.heartbeat.next_deadline()
        } else {
            None
        };
        [self.connect_deadline, heartbeat, self.reconnect_at]
            .into_iter()
            .flatten()
            .min()
    }

    // ---- methods ----

    fn register_call(&mut self, call: NewCall) -> CallHandle {
        let user_id = self.account.as_ref().map(|account| account.user_id.as_str());
        let (method_id, stub_value) =
            self.methods
                .call(call, &self.database, &self.stubs, user_id);
        self.flush_outgoing();
        CallHandle {
            method_id,
            stub_value,
        }
    }

    /// Calls a server method.
    ///
    /// A registered stub runs immediately; `on_complete` runs once the
    /// result is in and the server's writes are visible in the cache.
    pub fn call(
        &mut self,
        name: impl Into<String>,
        params: Vec<Value>,
        options: CallOptions,
        on_complete: Option<CompletionHandler>,
    ) -> CallHandle {
        self.call_with_handlers(name, params, options, None, on_complete)
    }

    /// Like [`call`](Self::call), with an extra handler that runs as soon as
    /// the result arrives.
    pub fn call_with_handlers(
        &mut self,
        name: impl Into<String>,
        params: Vec<Value>,
        options: CallOptions,
        on_result: Option<ResultHandler>,
        on_complete: Option<CompletionHandler>,
    ) -> CallHandle {
        let mut call = NewCall::new(name, params, CallPurpose::User);
        call.options = options;
        call.on_result = on_result;
        call.on_complete = on_complete;
        self.register_call(call)
    }

    /// Inserts a document through `/<collection>/insert`. The ID is
    /// generated here and matches the one the server assigns.
    pub fn insert_document(
        &mut self,
        collection: &str,
        fields: Fields,
        on_complete: Option<CompletionHandler>,
    ) -> DocumentId {
        let seed = random_seed();
        let id = DocumentId::new(
            RandomStream::new(seed.clone()).id(&mutators::id_stream_name(collection)),
        );
        let params = mutators::insert_params(&id, &fields);
        let options = CallOptions::new().with_random_seed(seed);
        self.call(Mutator::Insert.method_name(collection), params, options, on_complete);
        id
    }

    /// Updates a document through `/<collection>/update`.
    pub fn update_document(
        &mut self,
        collection: &str,
        id: &DocumentId,
        changed: &Fields,
        cleared: &[String],
        on_complete: Option<CompletionHandler>,
    ) -> CallHandle {
        let params = mutators::update_params(id, changed, cleared);
        self.call(
            Mutator::Update.method_name(collection),
            params,
            CallOptions::new(),
            on_complete,
        )
    }

    /// Removes a document through `/<collection>/remove`.
    pub fn remove_document(
        &mut self,
        collection: &str,
        id: &DocumentId,
        on_complete: Option<CompletionHandler>,
    ) -> CallHandle {
        self.call(
            Mutator::Remove.method_name(collection),
            mutators::remove_params(id),
            CallOptions::new(),
            on_complete,
        )
    }

    // ---- accounts ----

    /// Logs in by calling `method` as a barrier. A result of the form
    /// `{id, token, tokenExpires}` becomes the current account.
    pub fn login_with_method(
        &mut self,
        method: impl Into<String>,
        params: Vec<Value>,
        on_complete: Option<CompletionHandler>,
    ) -> CallHandle {
        self.logging_in = true;
        let mut call = NewCall::new(method, params, CallPurpose::Login);
        call.options = CallOptions::new().barrier();
        call.on_complete = on_complete;
        self.register_call(call)
    }

    /// Logs out and forgets the saved account.
    pub fn logout(&mut self, on_complete: Option<CompletionHandler>) -> CallHandle {
        let mut call = NewCall::new("logout", Vec::new(), CallPurpose::Logout);
        call.options = CallOptions::new().barrier();
        call.on_complete = on_complete;
        self.register_call(call)
    }

    // ---- subscriptions ----

    /// Subscribes to a publication. Returns the subscription ID, shared
    /// with any live subscription of the same name and parameters.
    pub fn add_subscription(
        &mut self,
        name: &str,
        params: Vec<Value>,
        on_ready: Option<SubscriptionHandler>,
    ) -> String {
        let id = self.subscriptions.add(name, params, on_ready);
        self.flush_outgoing();
        id
    }

    /// Drops one reference to a subscription.
    pub fn remove_subscription(&mut self, id: &str) {
        if let Some(unsub) = self.subscriptions.remove(id) {
            if let Err(error) = self.send(unsub) {
                self.connection_lost(error);
                return;
            }
        }
        // The removed subscription may have been the last one reviving
        self.flush_outgoing();
    }
}

impl<T: Transport> std::fmt::Debug for DdpClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdpClient")
            .field("url", &self.config.server_url)
            .field("status", &self.status)
            .field("session_id", &self.session_id)
            .field("methods", &self.methods)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
