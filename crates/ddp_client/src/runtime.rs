//! Async driver.
//!
//! [`spawn`] moves a [`DdpClient`] into a tokio task that serializes three
//! inputs: transport events, commands from [`ClientHandle`]s, and timer
//! wake-ups. Handles are cheap to clone and may be used from any task.

use crate::client::{ConnectionStatus, DdpClient};
use crate::error::{ClientError, ClientResult};
use crate::invocation::{CallOptions, CompletionHandler, MethodOutcome};
use crate::transport::{Transport, TransportEvent};
use ddp_core::{Database, DocumentId, Fields};
use ddp_protocol::MethodError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

type Ready = oneshot::Receiver<Result<(), MethodError>>;

enum Command {
    Connect,
    Disconnect,
    Call {
        name: String,
        params: Vec<Value>,
        options: CallOptions,
        reply: oneshot::Sender<MethodOutcome>,
    },
    Insert {
        collection: String,
        fields: Fields,
        id: oneshot::Sender<DocumentId>,
        reply: oneshot::Sender<MethodOutcome>,
    },
    Login {
        method: String,
        params: Vec<Value>,
        reply: oneshot::Sender<MethodOutcome>,
    },
    Logout {
        reply: oneshot::Sender<MethodOutcome>,
    },
    Subscribe {
        name: String,
        params: Vec<Value>,
        reply: oneshot::Sender<(String, Ready)>,
    },
    Unsubscribe {
        id: String,
    },
    Shutdown,
}

/// A cloneable handle to a client running in a tokio task.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    database: Arc<Database>,
}

/// Runs `client` in a new task fed by `events`.
pub fn spawn<T>(
    client: DdpClient<T>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (ClientHandle, JoinHandle<()>)
where
    T: Transport + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(client.status());
    let handle = ClientHandle {
        commands: command_tx,
        status: status_rx,
        database: Arc::clone(client.database()),
    };
    let task = tokio::spawn(run(client, events, command_rx, status_tx));
    (handle, task)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn reply_on_complete(reply: oneshot::Sender<MethodOutcome>) -> Option<CompletionHandler> {
    Some(Box::new(move |outcome: MethodOutcome| {
        let _ = reply.send(outcome);
    }))
}

async fn run<T: Transport>(
    mut client: DdpClient<T>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
) {
    let mut events_open = true;
    loop {
        let deadline = client.next_timer_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(command) => apply(&mut client, command),
            },
            event = events.recv(), if events_open => match event {
                Some(event) => client.handle_transport_event(event),
                None => {
                    debug!("transport event channel closed");
                    events_open = false;
                }
            },
            () = sleep_until(deadline) => client.poll_timers(),
        }
        status.send_if_modified(|current| {
            let changed = *current != client.status();
            *current = client.status();
            changed
        });
    }
    client.disconnect();
    status.send_replace(client.status());
    debug!("client task stopped");
}

fn apply<T: Transport>(client: &mut DdpClient<T>, command: Command) {
    match command {
        Command::Connect => client.connect(),
        Command::Disconnect => client.disconnect(),
        Command::Call {
            name,
            params,
            options,
            reply,
        } => {
            client.call(name, params, options, reply_on_complete(reply));
        }
        Command::Insert {
            collection,
            fields,
            id,
            reply,
        } => {
            let inserted = client.insert_document(&collection, fields, reply_on_complete(reply));
            let _ = id.send(inserted);
        }
        Command::Login {
            method,
            params,
            reply,
        } => {
            client.login_with_method(method, params, reply_on_complete(reply));
        }
        Command::Logout { reply } => {
            client.logout(reply_on_complete(reply));
        }
        Command::Subscribe {
            name,
            params,
            reply,
        } => {
            let (ready_tx, ready_rx) = oneshot::channel();
            let id = client.add_subscription(
                &name,
                params,
                Some(Box::new(move |outcome: Result<(), MethodError>| {
                    let _ = ready_tx.send(outcome);
                })),
            );
            let _ = reply.send((id, ready_rx));
        }
        Command::Unsubscribe { id } => client.remove_subscription(&id),
        Command::Shutdown => {}
    }
}

impl ClientHandle {
    fn send(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Shutdown)
    }

    async fn method(
        &self,
        command: impl FnOnce(oneshot::Sender<MethodOutcome>) -> Command,
    ) -> ClientResult<Value> {
        let (reply, outcome) = oneshot::channel();
        self.send(command(reply))?;
        match outcome.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ClientError::Method(error)),
            Err(_) => Err(ClientError::Shutdown),
        }
    }

    /// The shared document cache.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The latest connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Waits until the client reaches `target`.
    pub async fn wait_for_status(&self, target: ConnectionStatus) -> ClientResult<()> {
        let mut status = self.status.clone();
        loop {
            if *status.borrow_and_update() == target {
                return Ok(());
            }
            status.changed().await.map_err(|_| ClientError::Shutdown)?;
        }
    }

    /// Starts connecting.
    pub fn connect(&self) -> ClientResult<()> {
        self.send(Command::Connect)
    }

    /// Disconnects and stops reconnecting.
    pub fn disconnect(&self) -> ClientResult<()> {
        self.send(Command::Disconnect)
    }

    /// Calls a method and waits until its result is in and its writes are
    /// visible.
    pub async fn call(
        &self,
        name: impl Into<String>,
        params: Vec<Value>,
        options: CallOptions,
    ) -> ClientResult<Value> {
        let name = name.into();
        self.method(|reply| Command::Call {
            name,
            params,
            options,
            reply,
        })
        .await
    }

    /// Inserts a document and waits for the server to apply it.
    pub async fn insert(
        &self,
        collection: impl Into<String>,
        fields: Fields,
    ) -> ClientResult<DocumentId> {
        let (id_tx, id_rx) = oneshot::channel();
        let collection = collection.into();
        self.method(|reply| Command::Insert {
            collection,
            fields,
            id: id_tx,
            reply,
        })
        .await?;
        id_rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Logs in with `method` and waits for the outcome.
    pub async fn login_with_method(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> ClientResult<Value> {
        let method = method.into();
        self.method(|reply| Command::Login {
            method,
            params,
            reply,
        })
        .await
    }

    /// Logs out.
    pub async fn logout(&self) -> ClientResult<()> {
        self.method(|reply| Command::Logout { reply }).await.map(|_| ())
    }

    /// Subscribes and waits until the subscription is ready.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        params: Vec<Value>,
    ) -> ClientResult<String> {
        let (reply, registered) = oneshot::channel();
        self.send(Command::Subscribe {
            name: name.into(),
            params,
            reply,
        })?;
        let (id, ready) = registered.await.map_err(|_| ClientError::Shutdown)?;
        match ready.await {
            Ok(Ok(())) => Ok(id),
            Ok(Err(error)) => Err(ClientError::Subscription(error)),
            Err(_) => Err(ClientError::Shutdown),
        }
    }

    /// Drops one reference to a subscription.
    pub fn unsubscribe(&self, id: impl Into<String>) -> ClientResult<()> {
        self.send(Command::Unsubscribe { id: id.into() })
    }

    /// Stops the client task.
    pub fn shutdown(&self) -> ClientResult<()> {
        self.send(Command::Shutdown)
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::MockTransport;
    use ddp_core::DocumentKey;
    use ddp_protocol::ClientMessage;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        handle: ClientHandle,
        mock: MockTransport,
        events: mpsc::UnboundedSender<TransportEvent>,
    }

    impl Harness {
        async fn connected() -> Self {
            let mock = MockTransport::new();
            let (events, rx) = mpsc::unbounded_channel();
            let client = DdpClient::new(ClientConfig::new("ws://test"), mock.clone());
            let (handle, _task) = spawn(client, rx);

            handle.connect().unwrap();
            handle
                .wait_for_status(ConnectionStatus::Connecting)
                .await
                .unwrap();
            events.send(TransportEvent::Opened).unwrap();
            events
                .send(TransportEvent::Message(
                    r#"{"msg":"connected","session":"s1"}"#.into(),
                ))
                .unwrap();
            handle
                .wait_for_status(ConnectionStatus::Connected)
                .await
                .unwrap();
            mock.take_sent();
            Self {
                handle,
                mock,
                events,
            }
        }

        fn server(&self, frame: serde_json::Value) {
            self.events
                .send(TransportEvent::Message(frame.to_string()))
                .unwrap();
        }

        /// Waits for the next client message.
        async fn next_message(&self) -> ClientMessage {
            for _ in 0..200 {
                if let Some(message) = self.mock.take_messages().into_iter().next() {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no message sent");
        }
    }

    #[tokio::test]
    async fn call_resolves_after_updated() {
        let h = Harness::connected().await;
        let handle = h.handle.clone();
        let call = tokio::spawn(async move { handle.call("add", vec![json!(1)], CallOptions::new()).await });

        let ClientMessage::Method { id, method, .. } = h.next_message().await else {
            panic!("expected a method message");
        };
        assert_eq!(method, "add");

        h.server(json!({"msg": "result", "id": id, "result": 2}));
        h.server(json!({"msg": "updated", "methods": [id]}));
        assert_eq!(call.await.unwrap(), Ok(json!(2)));
    }

    #[tokio::test]
    async fn method_error_is_returned() {
        let h = Harness::connected().await;
        let handle = h.handle.clone();
        let call = tokio::spawn(async move { handle.call("boom", vec![], CallOptions::new()).await });

        let ClientMessage::Method { id, .. } = h.next_message().await else {
            panic!("expected a method message");
        };
        h.server(json!({"msg": "result", "id": id, "error": {"error": 500, "reason": "Internal"}}));
        h.server(json!({"msg": "updated", "methods": [id]}));

        let error = call.await.unwrap().unwrap_err();
        assert_eq!(error, ClientError::Method(MethodError::new(500, "Internal")));
    }

    #[tokio::test]
    async fn subscribe_waits_for_ready() {
        let h = Harness::connected().await;
        let handle = h.handle.clone();
        let sub = tokio::spawn(async move { handle.subscribe("tasks", vec![]).await });

        let ClientMessage::Sub { id, .. } = h.next_message().await else {
            panic!("expected a sub message");
        };
        h.server(json!({"msg": "added", "collection": "tasks", "id": "t1", "fields": {"title": "milk"}}));
        h.server(json!({"msg": "ready", "subs": [id.clone()]}));

        assert_eq!(sub.await.unwrap(), Ok(id));
        assert!(h
            .handle
            .database()
            .document_with_key(&DocumentKey::new("tasks", "t1"))
            .is_some());
    }

    #[tokio::test]
    async fn shutdown_fails_pending_calls() {
        let h = Harness::connected().await;
        let handle = h.handle.clone();
        let call = tokio::spawn(async move { handle.call("slow", vec![], CallOptions::new()).await });
        h.next_message().await;

        h.handle.shutdown().unwrap();
        assert_eq!(call.await.unwrap(), Err(ClientError::Shutdown));
        h.handle
            .wait_for_status(ConnectionStatus::Offline)
            .await
            .unwrap();
    }
}
