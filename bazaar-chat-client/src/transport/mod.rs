//! Persistent bidirectional connection to the chat service.
//!
//! A [`Transport`] delivers named control events, correlates request/ack
//! pairs, reconnects on its own and reports its lifecycle as a stream of
//! [`TransportEvent`]s. The session layer never touches sockets directly.

use async_trait::async_trait;
use serde_json::Value;
use shared::models::{ClientEvent, ServerEvent};
use thiserror::Error;

pub mod websocket;

pub use websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("connection closed before the acknowledgment arrived")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("invalid connection request: {0}")]
    Request(String),
}

/// Lifecycle and push notifications produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection attempt started.
    Connecting,
    /// The underlying link is up. Registration has not happened yet.
    Connected,
    /// The link dropped; the transport retries on its own.
    Disconnected { reason: String },
    /// Unsolicited event from the remote system.
    Push(ServerEvent),
}

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Start connecting. Lifecycle changes arrive as [`TransportEvent`]s.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Fire-and-forget event.
    async fn emit(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Send an event and wait for the raw acknowledgment value. Timeouts are
    /// applied by the caller.
    async fn request(&self, event: ClientEvent) -> Result<Value, TransportError>;

    /// Close the link and stop reconnecting.
    async fn disconnect(&self);
}
