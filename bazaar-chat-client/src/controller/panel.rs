use std::sync::Arc;

use async_trait::async_trait;
use shared::models::Message;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SessionEventHandler, spawn_event_loop};
use crate::{
    directory::ConversationDirectory,
    engine::{ResyncScope, SyncEngine},
    error::{ChatError, ChatResult},
    session::SessionEvent,
};

/// Operator panel: the whole directory, every timeline preloaded, one
/// conversation selected at a time.
#[derive(Debug)]
pub struct PanelController {
    engine: SyncEngine,
}

impl PanelController {
    #[must_use]
    pub fn new(engine: SyncEngine) -> Arc<Self> {
        Arc::new(Self { engine })
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Restore the warm-start snapshot, then start consuming session events
    /// and connect. The directory is seeded once registration completes.
    ///
    /// # Errors
    /// Fails only when the transport refuses to start.
    pub async fn start(self: &Arc<Self>) -> ChatResult<JoinHandle<()>> {
        if self.engine.warm_start().await {
            info!(
                conversations = self.engine.snapshot().directory.len(),
                "panel restored from warm-start snapshot"
            );
        }

        let events = spawn_event_loop(Arc::clone(self), self.engine.session().subscribe());
        self.engine.session().connect().await?;
        Ok(events)
    }

    #[must_use]
    pub fn directory(&self) -> ConversationDirectory {
        self.engine.snapshot().directory.clone()
    }

    #[must_use]
    pub fn selected(&self) -> Option<String> {
        self.engine.snapshot().active.clone()
    }

    #[must_use]
    pub fn messages(&self, counterpart_id: &str) -> Vec<Message> {
        self.engine.snapshot().messages(counterpart_id).to_vec()
    }

    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.engine.snapshot().directory.total_unread()
    }

    /// Select a conversation: load it (usually from the preload) and mark
    /// its inbound messages read.
    ///
    /// # Errors
    /// Propagates the load failure.
    pub async fn select(&self, counterpart_id: &str) -> ChatResult<Vec<Message>> {
        let messages = self.engine.open(counterpart_id).await?;
        self.engine.persist().await;
        Ok(messages)
    }

    pub fn clear_selection(&self) {
        self.engine.close();
    }

    /// Reply to the selected customer.
    ///
    /// # Errors
    /// [`ChatError::NoActiveConversation`] without a selection, otherwise see
    /// [`SyncEngine::send`].
    pub async fn send(&self, body: &str) -> ChatResult<Message> {
        let selected = self.selected().ok_or(ChatError::NoActiveConversation)?;
        let result = self.engine.send(&selected, body).await;
        self.engine.persist().await;
        result
    }

    /// Merge a fresh directory listing and preload any newly listed
    /// conversation.
    ///
    /// # Errors
    /// Propagates the listing failure.
    pub async fn refresh_directory(&self) -> ChatResult<()> {
        self.engine.refresh_directory().await?;
        let snapshot = self.engine.snapshot();
        let unloaded = snapshot
            .directory
            .entries()
            .iter()
            .filter(|entry| {
                snapshot
                    .timeline(&entry.counterpart_id)
                    .is_none_or(|timeline| !timeline.is_loaded())
            })
            .map(|entry| entry.counterpart_id.clone())
            .collect();
        self.engine.preload(unloaded).await;
        Ok(())
    }
}

#[async_trait]
impl SessionEventHandler for PanelController {
    async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Registered { .. } => self.resynchronize().await,
            SessionEvent::Disconnected { .. } => self.engine.mark_stale(),
            SessionEvent::NewMessage(message) => {
                let viewer = self.engine.viewer();
                let unread = message.is_unread_for(&viewer.id);
                let id = message.id.clone();
                let folded = self.engine.fold_message(message);

                if unread && self.engine.snapshot().is_active(&folded.counterpart_id) {
                    if let Err(err) = self.engine.reads().mark_read(&id).await {
                        debug!(message_id = %id, error = %err, "could not mark message read");
                    }
                }

                if folded.first_contact {
                    info!(counterpart = %folded.counterpart_id, "new conversation, refreshing directory");
                    if let Err(err) = self.refresh_directory().await {
                        warn!(error = %err, "directory refresh after first contact failed");
                    }
                }
                self.engine.persist().await;
            }
        }
    }

    async fn resynchronize(&self) {
        if let Err(err) = self.engine.resync(ResyncScope::Directory).await {
            warn!(error = %err, "panel resync failed");
        }
        self.engine.persist().await;
    }
}
