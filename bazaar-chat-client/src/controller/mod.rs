//! View controllers that consume session events with their own aggregation
//! rules: the customer support widget and the operator panel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::session::SessionEvent;

pub mod panel;
pub mod widget;

#[cfg(test)]
mod controller_tests;

pub use panel::PanelController;
pub use widget::WidgetController;

#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn handle_event(&self, event: SessionEvent);

    /// Events were dropped because this consumer fell behind. The handler
    /// must rebuild its view from the remote system.
    async fn resynchronize(&self);
}

/// Feed `events` to `handler` until the session goes away.
pub fn spawn_event_loop<H>(handler: Arc<H>, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()>
where
    H: SessionEventHandler + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handler.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session consumer lagged, resynchronizing");
                    handler.resynchronize().await;
                }
                Err(RecvError::Closed) => {
                    debug!("session event stream closed");
                    break;
                }
            }
        }
    })
}
