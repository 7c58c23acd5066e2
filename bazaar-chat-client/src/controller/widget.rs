use std::sync::Arc;

use async_trait::async_trait;
use shared::models::{Message, SUPPORT_POOL_ID};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{SessionEventHandler, spawn_event_loop};
use crate::{
    engine::{ResyncScope, SyncEngine},
    error::ChatResult,
    session::SessionEvent,
};

/// Customer support widget: a single conversation with the support pool.
///
/// The widget is open while the support conversation is the active one.
#[derive(Debug)]
pub struct WidgetController {
    engine: SyncEngine,
}

impl WidgetController {
    #[must_use]
    pub fn new(engine: SyncEngine) -> Arc<Self> {
        Arc::new(Self { engine })
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Restore the warm-start snapshot, seed the history over REST, then
    /// start consuming session events and connect.
    ///
    /// # Errors
    /// Fails only when the transport refuses to start.
    pub async fn start(self: &Arc<Self>) -> ChatResult<JoinHandle<()>> {
        self.engine.warm_start().await;
        if let Err(err) = self.engine.seed_history(SUPPORT_POOL_ID).await {
            warn!(error = %err, "message history bootstrap failed");
        }

        let events = spawn_event_loop(Arc::clone(self), self.engine.session().subscribe());
        self.engine.session().connect().await?;
        Ok(events)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.engine.snapshot().is_active(SUPPORT_POOL_ID)
    }

    /// Open or close the widget. Opening loads the conversation and marks
    /// unread replies read. Returns whether the widget is now open.
    ///
    /// # Errors
    /// Propagates the load failure when opening.
    pub async fn toggle(&self) -> ChatResult<bool> {
        if self.is_open() {
            self.engine.close();
            return Ok(false);
        }
        self.engine.open(SUPPORT_POOL_ID).await?;
        self.engine.persist().await;
        Ok(true)
    }

    /// Send to the support pool. No specific operator is addressed.
    ///
    /// # Errors
    /// See [`SyncEngine::send`].
    pub async fn send(&self, body: &str) -> ChatResult<Message> {
        let result = self.engine.send(SUPPORT_POOL_ID, body).await;
        self.engine.persist().await;
        result
    }

    #[must_use]
    pub fn can_send(&self) -> bool {
        self.engine.session().is_registered()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.engine.snapshot().messages(SUPPORT_POOL_ID).to_vec()
    }

    /// Badge count: unread replies while the widget is closed.
    #[must_use]
    pub fn unread_count(&self) -> u32 {
        self.engine
            .snapshot()
            .directory
            .get(SUPPORT_POOL_ID)
            .map_or(0, |entry| entry.unread_count)
    }
}

#[async_trait]
impl SessionEventHandler for WidgetController {
    async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Registered { .. } => self.resynchronize().await,
            SessionEvent::Disconnected { .. } => self.engine.mark_stale(),
            SessionEvent::NewMessage(message) => {
                let viewer = self.engine.viewer();
                let unread = message.is_unread_for(&viewer.id);
                let id = message.id.clone();
                self.engine.fold_message(message);

                if unread && self.is_open() {
                    if let Err(err) = self.engine.reads().mark_read(&id).await {
                        debug!(message_id = %id, error = %err, "could not mark reply read");
                    }
                }
                self.engine.persist().await;
            }
        }
    }

    async fn resynchronize(&self) {
        let scope = ResyncScope::Timeline(SUPPORT_POOL_ID.to_string());
        if let Err(err) = self.engine.resync(scope).await {
            warn!(error = %err, "widget resync failed");
        }
        self.engine.persist().await;
    }
}
