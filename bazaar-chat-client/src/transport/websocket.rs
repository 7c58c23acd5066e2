//! WebSocket transport.
//!
//! Frames are JSON objects `{"event": <name>, "id": <correlation id>?, "data": ...}`.
//! Requests carry an `id`; the remote answers with an `ack` frame echoing it.
//! A single background task owns the socket, reconnects with exponential
//! backoff and fails every in-flight request when the link drops.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::{
    config::{ReconnectConfig, ServerConfig},
    models::{ClientEvent, ServerEvent},
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::sleep,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::{Transport, TransportError, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckSender = oneshot::Sender<Result<Value, TransportError>>;

const ACK_EVENT: &str = "ack";
const COMMAND_BUFFER: usize = 64;

/// One JSON frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Wrap a client event, optionally tagged with a correlation id.
    ///
    /// # Errors
    /// Returns an error when the payload cannot be serialized.
    pub fn from_event(event: &ClientEvent, id: Option<String>) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(event)?;
        let data = value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(Self {
            event: event.name().to_string(),
            id,
            data,
        })
    }

    /// Interpret an inbound non-ack frame as a push.
    fn into_push(self) -> Option<ServerEvent> {
        serde_json::from_value(json!({ "event": self.event, "data": self.data })).ok()
    }
}

enum Command {
    Emit {
        frame: Frame,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Request {
        frame: Frame,
        reply: AckSender,
    },
    Shutdown,
}

enum LinkOutcome {
    Shutdown,
    Dropped(String),
}

#[derive(Debug)]
pub struct WebSocketTransport {
    url: Url,
    token: Option<String>,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<TransportEvent>,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Build a transport and the receiver its lifecycle events arrive on.
    #[must_use]
    pub fn new(
        server: &ServerConfig,
        reconnect: ReconnectConfig,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, receiver) = mpsc::channel(event_buffer.max(1));
        let transport = Self {
            url: server.socket_url.clone(),
            token: server.auth_token.clone(),
            reconnect,
            events,
            commands: Mutex::new(None),
            task: Mutex::new(None),
        };
        (transport, receiver)
    }

    fn sender(&self) -> Result<mpsc::Sender<Command>, TransportError> {
        self.commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut commands = self
            .commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if commands.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run_link(
            self.url.clone(),
            self.token.clone(),
            self.reconnect.clone(),
            receiver,
            self.events.clone(),
        ));
        *commands = Some(sender);
        *self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        let frame = Frame::from_event(&event, None)?;
        let (done, result) = oneshot::channel();
        self.sender()?
            .send(Command::Emit { frame, done })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    async fn request(&self, event: ClientEvent) -> Result<Value, TransportError> {
        let frame = Frame::from_event(&event, Some(Uuid::new_v4().to_string()))?;
        let (reply, result) = oneshot::channel();
        self.sender()?
            .send(Command::Request { frame, reply })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    async fn disconnect(&self) {
        let sender = self
            .commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(Command::Shutdown).await;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn open_socket(url: &Url, token: Option<&str>) -> Result<Socket, TransportError> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| TransportError::Request(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

async fn run_link(
    url: Url,
    token: Option<String>,
    reconnect: ReconnectConfig,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut attempt: u32 = 0;

    loop {
        let _ = events.send(TransportEvent::Connecting).await;

        let reason = match open_socket(&url, token.as_deref()).await {
            Ok(socket) => {
                info!(url = %url, "chat connection established");
                attempt = 0;
                let _ = events.send(TransportEvent::Connected).await;
                match serve_link(socket, &mut commands, &events).await {
                    LinkOutcome::Shutdown => {
                        let _ = events
                            .send(TransportEvent::Disconnected {
                                reason: "closed by client".to_string(),
                            })
                            .await;
                        return;
                    }
                    LinkOutcome::Dropped(reason) => reason,
                }
            }
            Err(err) => err.to_string(),
        };

        let delay = reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        warn!(reason = %reason, attempt, delay_ms = delay.as_millis(), "chat connection lost, retrying");
        let _ = events.send(TransportEvent::Disconnected { reason }).await;

        let backoff = sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                () = &mut backoff => break,
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => return,
                    Some(Command::Emit { done, .. }) => {
                        let _ = done.send(Err(TransportError::NotConnected));
                    }
                    Some(Command::Request { reply, .. }) => {
                        let _ = reply.send(Err(TransportError::NotConnected));
                    }
                },
            }
        }
    }
}

async fn serve_link(
    socket: Socket,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::Sender<TransportEvent>,
) -> LinkOutcome {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<String, AckSender> = HashMap::new();

    let outcome = loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => {
                    let _ = sink.close().await;
                    break LinkOutcome::Shutdown;
                }
                Some(Command::Emit { frame, done }) => {
                    let sent = send_frame(&mut sink, &frame).await;
                    let failed = sent.as_ref().err().map(ToString::to_string);
                    let _ = done.send(sent);
                    if let Some(reason) = failed {
                        break LinkOutcome::Dropped(reason);
                    }
                }
                Some(Command::Request { frame, reply }) => {
                    let Some(id) = frame.id.clone() else {
                        let _ = reply.send(Err(TransportError::Request("request frame without id".into())));
                        continue;
                    };
                    match send_frame(&mut sink, &frame).await {
                        Ok(()) => track(&mut pending, id, reply),
                        Err(err) => {
                            let reason = err.to_string();
                            let _ = reply.send(Err(err));
                            break LinkOutcome::Dropped(reason);
                        }
                    }
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_text(text.as_str(), &mut pending, events).await;
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = sink.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "closed by server".to_string(),
                        |frame| frame.reason.as_str().to_string(),
                    );
                    break LinkOutcome::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break LinkOutcome::Dropped(err.to_string()),
                None => break LinkOutcome::Dropped("stream ended".to_string()),
            },
        }
    };

    if !pending.is_empty() {
        debug!(count = pending.len(), "failing in-flight requests");
    }
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::Closed));
    }
    outcome
}

/// Remember a request awaiting its ack. Entries whose caller already gave
/// up (timed out) are dropped first.
fn track(pending: &mut HashMap<String, AckSender>, id: String, reply: AckSender) {
    pending.retain(|_, waiting| !waiting.is_closed());
    pending.insert(id, reply);
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), TransportError>
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let payload = serde_json::to_string(frame)?;
    sink.send(WsMessage::text(payload)).await?;
    Ok(())
}

async fn handle_text(
    text: &str,
    pending: &mut HashMap<String, AckSender>,
    events: &mpsc::Sender<TransportEvent>,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "dropping unparseable frame");
            return;
        }
    };

    if frame.event == ACK_EVENT {
        match frame.id.as_ref().and_then(|id| pending.remove(id)) {
            Some(reply) => {
                let _ = reply.send(Ok(frame.data));
            }
            None => debug!(id = ?frame.id, "ack without a waiting request"),
        }
        return;
    }

    let name = frame.event.clone();
    match frame.into_push() {
        Some(push) => {
            let _ = events.send(TransportEvent::Push(push)).await;
        }
        None => debug!(event = %name, "ignoring unknown event"),
    }
}
