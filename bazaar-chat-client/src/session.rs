//! Connection session: lifecycle state machine, registration and the typed
//! request surface on top of a [`Transport`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use serde::de::DeserializeOwned;
use shared::{
    config::SyncConfig,
    models::{
        Ack, ClientEvent, GetConversationPayload, MarkAsReadPayload, Message, MessageId,
        Participant, RegisterPayload, SendMessagePayload, ServerEvent,
    },
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{ChatError, ChatResult},
    transport::{Transport, TransportEvent},
};

/// Where the session is in its connect and register cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
}

/// Events fanned out to every controller sharing the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Registration completed. `resumed` is set when this follows a drop, in
    /// which case consumers must resynchronize.
    Registered { resumed: bool },
    Disconnected { reason: String },
    NewMessage(Message),
}

#[derive(Debug)]
pub struct ConnectionSession {
    participant: Participant,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    request_timeout: Duration,
    registrations: AtomicU64,
}

impl ConnectionSession {
    pub fn new(
        participant: Participant,
        transport: Arc<dyn Transport>,
        sync: &SyncConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(sync.event_buffer.max(1));
        Arc::new(Self {
            participant,
            transport,
            state,
            events,
            request_timeout: sync.request_timeout(),
            registrations: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state() == ConnectionState::Registered
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Drive the session from the transport's lifecycle events until the
    /// transport goes away.
    pub fn spawn(self: &Arc<Self>, mut transport_events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                session.handle_transport_event(event).await;
            }
            debug!("transport event stream closed");
        })
    }

    /// Start connecting. Registration follows once the transport reports the
    /// link is up.
    ///
    /// # Errors
    /// Returns [`ChatError::Transport`] when the transport refuses to start.
    pub async fn connect(&self) -> ChatResult<()> {
        if self.state() == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Connecting);
        }
        self.transport.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                if self.state() == ConnectionState::Disconnected {
                    self.set_state(ConnectionState::Connecting);
                }
            }
            TransportEvent::Connected => self.register().await,
            TransportEvent::Disconnected { reason } => {
                if self.state() != ConnectionState::Disconnected {
                    info!(reason = %reason, "chat session disconnected");
                    self.set_state(ConnectionState::Disconnected);
                    let _ = self.events.send(SessionEvent::Disconnected { reason });
                }
            }
            TransportEvent::Push(ServerEvent::NewMessage(message)) => {
                if self.is_registered() {
                    let _ = self.events.send(SessionEvent::NewMessage(message));
                } else {
                    warn!(message_id = %message.id, "dropping push received before registration");
                }
            }
        }
    }

    /// Announce identity and role. Runs at most once per connection.
    async fn register(&self) {
        if self.is_registered() {
            debug!("ignoring duplicate connect notification");
            return;
        }
        self.set_state(ConnectionState::Connecting);

        let event = ClientEvent::Register(RegisterPayload {
            user_id: self.participant.id.clone(),
            role: self.participant.role,
        });
        if let Err(err) = self.transport.emit(event).await {
            warn!(error = %err, "registration failed");
            return;
        }

        let previous = self.registrations.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            counter!("bazaar_chat_reconnects_total").increment(1);
        }
        self.set_state(ConnectionState::Registered);
        info!(participant = %self.participant.id, role = %self.participant.role, "chat session registered");
        let _ = self.events.send(SessionEvent::Registered {
            resumed: previous > 0,
        });
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    /// Send a message and return the confirmed copy.
    ///
    /// # Errors
    /// Fails when not registered, on timeout, or when the remote rejects it.
    #[instrument(name = "chat.send_message", skip(self, body), err)]
    pub async fn send_message(&self, receiver_id: Option<String>, body: &str) -> ChatResult<Message> {
        let event = ClientEvent::SendMessage(SendMessagePayload {
            sender_id: self.participant.id.clone(),
            receiver_id,
            message: body.to_string(),
            sender_role: self.participant.role,
        });
        self.request(event).await
    }

    /// Full message history between the viewer and `user_id`.
    ///
    /// # Errors
    /// Fails when not registered, on timeout, or when the remote rejects it.
    #[instrument(name = "chat.get_conversation", skip(self), err)]
    pub async fn get_conversation(&self, user_id: &str) -> ChatResult<Vec<Message>> {
        let event = ClientEvent::GetConversation(GetConversationPayload {
            user_id: user_id.to_string(),
        });
        self.request(event).await
    }

    /// # Errors
    /// Fails when not registered, on timeout, or when the remote rejects it.
    #[instrument(name = "chat.mark_as_read", skip(self), err)]
    pub async fn mark_as_read(&self, message_id: &MessageId) -> ChatResult<()> {
        let event = ClientEvent::MarkAsRead(MarkAsReadPayload {
            message_id: message_id.clone(),
        });
        let _: serde_json::Value = self.request(event).await?;
        Ok(())
    }

    async fn request<T: DeserializeOwned>(&self, event: ClientEvent) -> ChatResult<T> {
        if !self.is_registered() {
            return Err(ChatError::NotConnected);
        }

        let name = event.name();
        let raw = match timeout(self.request_timeout, self.transport.request(event)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChatError::TimedOut {
                    event: name,
                    timeout: self.request_timeout,
                });
            }
        };

        Ack::from_value(raw)
            .and_then(Ack::into_result::<T>)
            .map_err(|err| ChatError::from_ack(name, err))
    }
}
