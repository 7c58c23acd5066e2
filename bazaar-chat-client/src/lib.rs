#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Real-time synchronization engine for Bazaar support chat.
//!
//! A [`ConnectionSession`] owns the websocket link and fans server pushes out
//! to any number of consumers. A [`SyncEngine`] keeps one viewer's timelines,
//! directory and read state consistent on top of it. The
//! [`WidgetController`] and [`PanelController`] apply the customer and
//! operator rules.

pub mod bootstrap;
pub mod cache;
pub mod controller;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logging;
pub mod read_tracker;
pub mod reconciler;
pub mod session;
pub mod state;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use bootstrap::{BootstrapApi, BootstrapError, RestBootstrap};
pub use cache::{ConversationCache, Timeline};
pub use controller::{PanelController, SessionEventHandler, WidgetController, spawn_event_loop};
pub use directory::{Conversation, ConversationDirectory};
pub use engine::{ResyncScope, SyncEngine};
pub use error::{ChatError, ChatResult};
pub use reconciler::Reconciler;
pub use session::{ConnectionSession, ConnectionState, SessionEvent};
pub use state::{ChatState, ChatStore};
pub use storage::WarmStartStore;
pub use transport::{Transport, TransportError, TransportEvent, WebSocketTransport};
