use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use shared::{
    config::SyncConfig,
    models::{ClientEvent, Message, MessageId, Participant, SenderRole, Timestamp},
};

use crate::{
    session::ConnectionSession,
    transport::{Transport, TransportError, TransportEvent},
};

pub const BASE_MILLIS: i64 = 1_700_000_000_000;

type Responder = dyn Fn(&ClientEvent) -> Result<Value, TransportError> + Send + Sync;

/// In-memory transport answering requests from a closure.
#[derive(Default)]
pub struct ScriptedTransport {
    emitted: Mutex<Vec<ClientEvent>>,
    requests: Mutex<Vec<ClientEvent>>,
    responder: Mutex<Option<Arc<Responder>>>,
    delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("connects", &self.connects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn respond_with(
        &self,
        responder: impl Fn(&ClientEvent) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) {
        *self.responder.lock().unwrap() = Some(Arc::new(responder));
    }

    pub fn respond_after(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<ClientEvent> {
        self.requests.lock().unwrap().clone()
    }

    pub fn mark_read_requests(&self) -> Vec<MessageId> {
        self.requests()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::MarkAsRead(payload) => Some(payload.message_id),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.emitted.lock().unwrap().push(event);
        Ok(())
    }

    async fn request(&self, event: ClientEvent) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(event.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let responder = self.responder.lock().unwrap().clone();
        match responder {
            Some(responder) => responder(&event),
            None => Ok(json!({"status": "success"})),
        }
    }

    async fn disconnect(&self) {}
}

pub fn customer() -> Participant {
    Participant::new("u1", SenderRole::Customer)
}

pub fn operator() -> Participant {
    Participant::new("op", SenderRole::Operator)
}

/// Message created `offset_ms` after [`BASE_MILLIS`].
pub fn message(
    id: &str,
    sender: &str,
    receiver: Option<&str>,
    role: SenderRole,
    body: &str,
    offset_ms: i64,
) -> Message {
    let at = Timestamp::from_millis(BASE_MILLIS + offset_ms);
    Message {
        id: MessageId::new(id),
        sender_id: sender.to_string(),
        receiver_id: receiver.map(str::to_string),
        body: body.to_string(),
        sender_role: role,
        is_read: false,
        created_at: at,
        updated_at: at,
    }
}

pub fn success<T: Serialize>(data: &T) -> Value {
    json!({"status": "success", "data": data})
}

/// Session over a scripted transport, already registered.
pub async fn registered_session(
    participant: Participant,
) -> (Arc<ConnectionSession>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::default());
    let session = ConnectionSession::new(participant, transport.clone(), &SyncConfig::default());
    session.handle_transport_event(TransportEvent::Connected).await;
    (session, transport)
}
