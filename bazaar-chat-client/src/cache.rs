//! Per-counterpart timelines and on-demand loading of them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::models::{Message, MessageId};
use tracing::{debug, instrument};

use crate::{
    error::ChatResult,
    reconciler::{Reconciler, remove_message},
    session::ConnectionSession,
    state::ChatStore,
};

/// Ordered messages of one conversation.
///
/// `loaded` is set once the authoritative history has been fetched. Before
/// that a timeline only holds what arrived live (or was restored from disk).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    messages: Vec<Message>,
    #[serde(skip)]
    loaded: bool,
}

impl Timeline {
    #[must_use]
    pub fn new(messages: Vec<Message>, loaded: bool) -> Self {
        Self { messages, loaded }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    /// Number of inbound messages `viewer_id` has not read.
    #[must_use]
    pub fn unread_for(&self, viewer_id: &str) -> u32 {
        let count = self
            .messages
            .iter()
            .filter(|message| message.is_unread_for(viewer_id))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Ids of confirmed inbound messages `viewer_id` has not read.
    #[must_use]
    pub fn unread_ids(&self, viewer_id: &str) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|message| !message.is_pending() && message.is_unread_for(viewer_id))
            .map(|message| message.id.clone())
            .collect()
    }

    #[must_use]
    pub fn reconciled(&self, reconciler: &Reconciler, incoming: Vec<Message>) -> Self {
        Self {
            messages: reconciler.reconcile_all(&self.messages, incoming),
            loaded: self.loaded,
        }
    }

    #[must_use]
    pub fn without(&self, id: &MessageId) -> Self {
        Self {
            messages: remove_message(&self.messages, id),
            loaded: self.loaded,
        }
    }

    #[must_use]
    pub fn with_read(&self, id: &MessageId) -> Self {
        let messages = self
            .messages
            .iter()
            .map(|message| {
                let mut message = message.clone();
                if &message.id == id {
                    message.is_read = true;
                }
                message
            })
            .collect();
        Self {
            messages,
            loaded: self.loaded,
        }
    }

    #[must_use]
    pub fn mark_loaded(mut self) -> Self {
        self.loaded = true;
        self
    }

    #[must_use]
    pub fn mark_unloaded(mut self) -> Self {
        self.loaded = false;
        self
    }
}

/// Loads timelines through the session and folds them into the store.
#[derive(Debug, Clone)]
pub struct ConversationCache {
    store: ChatStore,
    session: Arc<ConnectionSession>,
    reconciler: Reconciler,
}

impl ConversationCache {
    #[must_use]
    pub fn new(store: ChatStore, session: Arc<ConnectionSession>, reconciler: Reconciler) -> Self {
        Self {
            store,
            session,
            reconciler,
        }
    }

    /// Messages of a loaded timeline, without touching the network.
    #[must_use]
    pub fn cached(&self, counterpart_id: &str) -> Option<Vec<Message>> {
        self.store
            .snapshot()
            .timeline(counterpart_id)
            .filter(|timeline| timeline.is_loaded())
            .map(|timeline| timeline.messages().to_vec())
    }

    /// Return the timeline for `counterpart_id`, fetching it on first use.
    ///
    /// # Errors
    /// Propagates the `getConversation` failure; the cache is left untouched.
    #[instrument(name = "chat.ensure_loaded", skip(self), err)]
    pub async fn ensure_loaded(&self, counterpart_id: &str) -> ChatResult<Vec<Message>> {
        if let Some(messages) = self.cached(counterpart_id) {
            debug!(count = messages.len(), "timeline served from cache");
            return Ok(messages);
        }
        self.refresh(counterpart_id).await
    }

    /// Re-fetch `counterpart_id`'s timeline and reconcile it into the cache.
    ///
    /// # Errors
    /// Propagates the `getConversation` failure; the cache is left untouched.
    pub async fn refresh(&self, counterpart_id: &str) -> ChatResult<Vec<Message>> {
        let viewer = self.session.participant().clone();
        let fetched = self
            .session
            .get_conversation(viewer.conversation_query_id(counterpart_id))
            .await?;
        debug!(counterpart = counterpart_id, count = fetched.len(), "timeline fetched");

        Ok(self.store.update(|state| {
            let next = state.with_fetched_timeline(counterpart_id, fetched, &viewer, &self.reconciler);
            let messages = next.messages(counterpart_id).to_vec();
            (next, messages)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{customer, message, operator, registered_session, success};
    use shared::models::{ClientEvent, SenderRole};

    #[test]
    fn unread_counts_only_inbound_messages() {
        let mut read = message("3", "op", Some("u1"), SenderRole::Operator, "c", 3);
        read.is_read = true;
        let timeline = Timeline::new(
            vec![
                message("1", "op", Some("u1"), SenderRole::Operator, "a", 1),
                message("2", "u1", None, SenderRole::Customer, "b", 2),
                read,
                message("4", "op", None, SenderRole::Operator, "d", 4),
            ],
            true,
        );

        assert_eq!(timeline.unread_for("u1"), 2);
        assert_eq!(
            timeline.unread_ids("u1"),
            vec![MessageId::new("1"), MessageId::new("4")]
        );
    }

    #[tokio::test]
    async fn ensure_loaded_fetches_once() {
        let (session, transport) = registered_session(operator()).await;
        let history = vec![
            message("1", "u7", None, SenderRole::Customer, "hi", 0),
            message("2", "op", Some("u7"), SenderRole::Operator, "hello", 10),
        ];
        let reply = history.clone();
        transport.respond_with(move |_| Ok(success(&reply)));
        let cache = ConversationCache::new(ChatStore::new(), session, Reconciler::default());

        assert_eq!(cache.ensure_loaded("u7").await.unwrap(), history);
        assert_eq!(cache.ensure_loaded("u7").await.unwrap(), history);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn customers_query_their_own_conversation() {
        let (session, transport) = registered_session(customer()).await;
        transport.respond_with(|_| Ok(success(&Vec::<Message>::new())));
        let cache = ConversationCache::new(ChatStore::new(), session, Reconciler::default());

        assert!(cache.ensure_loaded("support").await.unwrap().is_empty());
        assert!(cache.cached("support").is_some());

        match &transport.requests()[0] {
            ClientEvent::GetConversation(payload) => assert_eq!(payload.user_id, "u1"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_untouched() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|_| Ok(serde_json::json!({"status": "error"})));
        let store = ChatStore::new();
        let cache = ConversationCache::new(store.clone(), session, Reconciler::default());

        assert!(cache.ensure_loaded("u7").await.is_err());
        assert!(store.snapshot().timeline("u7").is_none());
        assert!(cache.cached("u7").is_none());
    }
}
