use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use shared::models::MessageId;
use tracing::{instrument, warn};

use crate::{
    error::{ChatError, ChatResult},
    session::ConnectionSession,
    state::ChatStore,
};

/// Marks inbound messages read on the remote system, then locally.
#[derive(Debug, Clone)]
pub struct ReadTracker {
    store: ChatStore,
    session: Arc<ConnectionSession>,
}

impl ReadTracker {
    #[must_use]
    pub fn new(store: ChatStore, session: Arc<ConnectionSession>) -> Self {
        Self { store, session }
    }

    /// Mark one cached message read. The local flag only flips after the
    /// remote acknowledged it.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] for unknown ids, [`ChatError::AlreadyRead`]
    /// when there is nothing to do, or the request failure.
    #[instrument(name = "chat.mark_read", skip(self), err)]
    pub async fn mark_read(&self, message_id: &MessageId) -> ChatResult<()> {
        {
            let snapshot = self.store.snapshot();
            let (_, message) = snapshot
                .locate(message_id)
                .ok_or_else(|| ChatError::NotFound(message_id.clone()))?;
            if message.is_read {
                return Err(ChatError::AlreadyRead(message_id.clone()));
            }
        }

        self.session.mark_as_read(message_id).await?;

        let viewer = self.session.participant();
        self.store
            .apply(|state| state.with_read(message_id, viewer));
        Ok(())
    }

    /// Mark every unread inbound message of `counterpart_id` read, one call
    /// per message. Failures are logged and left for the next attempt.
    ///
    /// Returns how many messages were marked.
    pub async fn mark_conversation_read(&self, counterpart_id: &str) -> usize {
        let unread = self
            .store
            .snapshot()
            .timeline(counterpart_id)
            .map(|timeline| timeline.unread_ids(&self.session.participant().id))
            .unwrap_or_default();
        if unread.is_empty() {
            return 0;
        }

        let results = join_all(unread.iter().map(|id| self.mark_read(id))).await;

        let mut marked = 0;
        for (id, result) in unread.iter().zip(results) {
            match result {
                Ok(()) => marked += 1,
                Err(err) => {
                    counter!("bazaar_chat_mark_read_failures_total").increment(1);
                    warn!(message_id = %id, error = %err, "failed to mark message read");
                }
            }
        }
        marked
    }
}
