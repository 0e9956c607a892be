//! WebSocket transport.

use ddp_client::{ClientError, ClientResult, Transport, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// A [`Transport`] over a WebSocket connection.
///
/// Each `open` spawns a task that owns the socket. Frames to send are passed
/// to it over a channel; everything it receives is reported as
/// [`TransportEvent`]s. Must be used inside a tokio runtime.
pub struct WsTransport {
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Creates a transport for `url` reporting to `events`.
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            url: url.into(),
            events,
            outgoing: None,
            task: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self) -> ClientResult<()> {
        self.close();
        let (outgoing, frames) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing);
        self.task = Some(tokio::spawn(run_socket(
            self.url.clone(),
            frames,
            self.events.clone(),
        )));
        Ok(())
    }

    fn close(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn send(&mut self, frame: String) -> ClientResult<()> {
        let outgoing = self.outgoing.as_ref().ok_or(ClientError::NotConnected)?;
        outgoing
            .send(frame)
            .map_err(|_| ClientError::transport_retryable("socket task stopped"))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    url: String,
    mut frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(error) => {
            let _ = events.send(TransportEvent::Error(error.to_string()));
            return;
        }
    };
    debug!(%url, "websocket open");
    let _ = events.send(TransportEvent::Opened);
    let (mut writer, mut reader) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(error) = writer.send(Message::text(frame)).await {
                        let _ = events.send(TransportEvent::Error(error.to_string()));
                        return;
                    }
                }
                None => {
                    let _ = writer.close().await;
                    return;
                }
            },
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(TransportEvent::Closed);
                    return;
                }
                // Control frames are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    let _ = events.send(TransportEvent::Error(error.to_string()));
                    return;
                }
            },
        }
    }
}
