//! Sync engine: the explicitly constructed root that owns one viewer's
//! session, caches and read tracking.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use futures::{StreamExt, stream};
use metrics::counter;
use shared::{
    config::SyncConfig,
    models::{Message, MessageId, Participant, Timestamp},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    bootstrap::BootstrapApi,
    cache::ConversationCache,
    error::{ChatError, ChatResult},
    read_tracker::ReadTracker,
    reconciler::Reconciler,
    session::ConnectionSession,
    state::{ChatState, ChatStore, Folded},
    storage::{Snapshot, WarmStartStore},
};

/// Hands out unique, increasing pending ids even for sends in the same
/// millisecond.
#[derive(Debug, Default)]
struct PendingIds {
    last: AtomicI64,
}

impl PendingIds {
    fn next(&self, now_millis: i64) -> MessageId {
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now_millis.max(current + 1);
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return MessageId::pending(candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<ConnectionSession>,
    store: ChatStore,
    cache: ConversationCache,
    reads: ReadTracker,
    bootstrap: Arc<dyn BootstrapApi>,
    storage: Option<WarmStartStore>,
    reconciler: Reconciler,
    preload_concurrency: usize,
    pending_ids: PendingIds,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("viewer", self.session.participant())
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        session: Arc<ConnectionSession>,
        bootstrap: Arc<dyn BootstrapApi>,
        storage: Option<WarmStartStore>,
        sync: &SyncConfig,
    ) -> Self {
        let store = ChatStore::new();
        let reconciler = Reconciler::new(sync.supersede_window());
        Self {
            inner: Arc::new(Inner {
                cache: ConversationCache::new(store.clone(), Arc::clone(&session), reconciler),
                reads: ReadTracker::new(store.clone(), Arc::clone(&session)),
                session,
                store,
                bootstrap,
                storage,
                reconciler,
                preload_concurrency: sync.preload_concurrency.max(1),
                pending_ids: PendingIds::default(),
            }),
        }
    }

    #[must_use]
    pub fn viewer(&self) -> &Participant {
        self.inner.session.participant()
    }

    #[must_use]
    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.inner.session
    }

    #[must_use]
    pub fn store(&self) -> &ChatStore {
        &self.inner.store
    }

    #[must_use]
    pub fn cache(&self) -> &ConversationCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn reads(&self) -> &ReadTracker {
        &self.inner.reads
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ChatState> {
        self.inner.store.snapshot()
    }

    /// Restore the last saved snapshot, if any. Returns whether one was found.
    pub async fn warm_start(&self) -> bool {
        let Some(storage) = &self.inner.storage else {
            return false;
        };
        match storage.load(&self.viewer().id).await {
            Ok(Some(snapshot)) => {
                let restored = snapshot.into_state(self.viewer());
                debug!(timelines = restored.timelines.len(), "warm start restored");
                self.inner.store.apply(|_| restored);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "discarding unreadable warm-start snapshot");
                false
            }
        }
    }

    /// Best-effort save of the current state for the next warm start.
    pub async fn persist(&self) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let snapshot = Snapshot::capture(&self.snapshot(), &self.viewer().id);
        if let Err(err) = storage.save(&snapshot).await {
            warn!(error = %err, "failed to save warm-start snapshot");
        }
    }

    /// Fold a live message into the caches.
    pub fn fold_message(&self, message: Message) -> Folded {
        counter!("bazaar_chat_messages_reconciled_total").increment(1);
        let viewer = self.viewer();
        self.inner.store.update(|state| state.with_message(message, viewer, &self.inner.reconciler))
    }

    /// Merge the REST directory listing into the directory.
    ///
    /// # Errors
    /// Propagates the bootstrap failure; the directory is left untouched.
    #[instrument(name = "chat.refresh_directory", skip(self), err)]
    pub async fn refresh_directory(&self) -> ChatResult<()> {
        let listing = self.inner.bootstrap.conversations().await?;
        let viewer = self.viewer();
        self.inner
            .store
            .apply(|state| state.with_directory_listing(listing, viewer));
        Ok(())
    }

    /// Seed `counterpart_id`'s timeline from the viewer's REST history.
    ///
    /// # Errors
    /// Propagates the bootstrap failure.
    #[instrument(name = "chat.seed_history", skip(self), err)]
    pub async fn seed_history(&self, counterpart_id: &str) -> ChatResult<usize> {
        let history = self.inner.bootstrap.messages().await?;
        let count = history.len();
        let viewer = self.viewer();
        self.inner.store.apply(|state| {
            state.with_fetched_timeline(counterpart_id, history, viewer, &self.inner.reconciler)
        });
        Ok(count)
    }

    /// Load every listed conversation, at most `preload_concurrency` at a time.
    /// Returns how many timelines loaded.
    pub async fn preload(&self, counterpart_ids: Vec<String>) -> usize {
        let results: Vec<(String, ChatResult<Vec<Message>>)> = stream::iter(counterpart_ids)
            .map(|counterpart_id| async move {
                let result = self.inner.cache.ensure_loaded(&counterpart_id).await;
                (counterpart_id, result)
            })
            .buffer_unordered(self.inner.preload_concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .filter(|(counterpart_id, result)| match result {
                Ok(_) => true,
                Err(err) => {
                    warn!(counterpart = %counterpart_id, error = %err, "preload failed");
                    false
                }
            })
            .count()
    }

    /// Make `counterpart_id` the active conversation, load it and mark its
    /// inbound messages read.
    ///
    /// # Errors
    /// Propagates the load failure. The selection stays in place.
    #[instrument(name = "chat.open", skip(self), err)]
    pub async fn open(&self, counterpart_id: &str) -> ChatResult<Vec<Message>> {
        let viewer = self.viewer();
        self.inner
            .store
            .apply(|state| state.with_active(Some(counterpart_id.to_string()), viewer));

        self.inner.cache.ensure_loaded(counterpart_id).await?;
        self.inner.reads.mark_conversation_read(counterpart_id).await;
        Ok(self.snapshot().messages(counterpart_id).to_vec())
    }

    pub fn close(&self) {
        let viewer = self.viewer();
        self.inner.store.apply(|state| state.with_active(None, viewer));
    }

    /// Optimistically append `body` to `counterpart_id`'s timeline and send it.
    /// The pending copy is replaced by the confirmed message on ack, or
    /// removed on failure.
    ///
    /// # Errors
    /// [`ChatError::EmptyMessage`] for blank input, [`ChatError::NotConnected`]
    /// while unregistered, or the send failure.
    #[instrument(name = "chat.send", skip(self, body), err)]
    pub async fn send(&self, counterpart_id: &str, body: &str) -> ChatResult<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.inner.session.is_registered() {
            return Err(ChatError::NotConnected);
        }

        let viewer = self.viewer();
        let now = Timestamp::now();
        let pending_id = self.inner.pending_ids.next(now.timestamp_millis());
        let receiver_id = viewer.receiver_for(counterpart_id);
        let pending = Message::pending(
            pending_id.clone(),
            viewer.id.clone(),
            receiver_id.clone(),
            body,
            viewer.role,
            now,
        );
        self.fold_message(pending);

        match self.inner.session.send_message(receiver_id, body).await {
            Ok(confirmed) => {
                self.inner.store.apply(|state| {
                    state.with_confirmed_send(&pending_id, confirmed.clone(), viewer, &self.inner.reconciler)
                });
                Ok(confirmed)
            }
            Err(err) => {
                counter!("bazaar_chat_send_failures_total").increment(1);
                self.inner
                    .store
                    .apply(|state| state.without_message(&pending_id, viewer));
                Err(err)
            }
        }
    }

    /// Keep cached state but treat it as stale until the next resync.
    pub fn mark_stale(&self) {
        self.inner.store.apply(|state| state.with_stale(true));
    }

    /// Rebuild state from the remote system after a reconnect or a lagged
    /// event stream, then clear the stale flag.
    ///
    /// # Errors
    /// Propagates the directory or timeline fetch failure; the state stays
    /// stale.
    #[instrument(name = "chat.resync", skip(self), err)]
    pub async fn resync(&self, scope: ResyncScope) -> ChatResult<()> {
        counter!("bazaar_chat_resyncs_total").increment(1);
        match scope {
            ResyncScope::Timeline(counterpart_id) => {
                self.inner.cache.refresh(&counterpart_id).await?;
            }
            ResyncScope::Directory => {
                self.refresh_directory().await?;
                let listed = self
                    .snapshot()
                    .directory
                    .entries()
                    .iter()
                    .map(|entry| entry.counterpart_id.clone())
                    .collect();
                self.preload(listed).await;
            }
        }

        if let Some(active) = self.snapshot().active.clone() {
            self.inner.reads.mark_conversation_read(&active).await;
        }
        self.inner.store.apply(|state| state.with_stale(false));
        info!("chat state resynchronized");
        Ok(())
    }
}

/// What a resync re-fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncScope {
    /// One timeline (the customer widget's support conversation).
    Timeline(String),
    /// The directory listing and every listed timeline (the operator panel).
    Directory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{BootstrapError, MockBootstrapApi},
        test_support::{customer, message, operator, registered_session, success},
    };
    use serde_json::json;
    use shared::models::{ClientEvent, ConversationSummary, SUPPORT_POOL_ID, SenderRole};
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine(session: Arc<ConnectionSession>, bootstrap: MockBootstrapApi) -> SyncEngine {
        SyncEngine::new(session, Arc::new(bootstrap), None, &SyncConfig::default())
    }

    #[test]
    fn pending_ids_are_unique_and_increasing() {
        let ids = PendingIds::default();
        assert_eq!(ids.next(1_000), MessageId::pending(1_000));
        assert_eq!(ids.next(1_000), MessageId::pending(1_001));
        assert_eq!(ids.next(999), MessageId::pending(1_002));
        assert_eq!(ids.next(5_000), MessageId::pending(5_000));
    }

    #[tokio::test]
    async fn send_replaces_pending_with_confirmed_copy() {
        let (session, transport) = registered_session(customer()).await;
        transport.respond_with(|event| match event {
            ClientEvent::SendMessage(payload) => {
                let mut confirmed = message("99", "u1", None, SenderRole::Customer, &payload.message, 0);
                confirmed.created_at = Timestamp::now();
                Ok(success(&confirmed))
            }
            _ => Ok(json!({"status": "success"})),
        });
        let engine = engine(session, MockBootstrapApi::new());

        let confirmed = engine.send(SUPPORT_POOL_ID, "hello").await.unwrap();

        assert_eq!(confirmed.id.as_str(), "99");
        let snapshot = engine.snapshot();
        let timeline = snapshot.messages(SUPPORT_POOL_ID);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].id.as_str(), "99");
        assert_eq!(
            snapshot.directory.get(SUPPORT_POOL_ID).unwrap().last_message.as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn failed_send_removes_pending_copy() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|_| Ok(json!({"status": "error", "message": "blocked"})));
        let engine = engine(session, MockBootstrapApi::new());

        let err = engine.send("u7", "hello").await.unwrap_err();

        assert!(matches!(err, ChatError::Rejected { .. }));
        assert!(engine.snapshot().messages("u7").is_empty());
        assert!(!engine.snapshot().directory.contains("u7"));
        match &transport.requests()[0] {
            ClientEvent::SendMessage(payload) => assert_eq!(payload.receiver_id.as_deref(), Some("u7")),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_send_restores_previous_preview() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&Vec::<Message>::new())),
            ClientEvent::SendMessage(_) => Ok(json!({"status": "error", "message": "blocked"})),
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap.expect_conversations().times(1).returning(|| {
            Ok(vec![ConversationSummary {
                counterpart_id: "u1".into(),
                display_name: "Ada".into(),
                email: None,
                avatar: None,
                last_message: Some("hi".into()),
                last_message_time: Some(Timestamp::from_millis(10)),
                unread_count: 0,
            }])
        });
        let engine = engine(session, bootstrap);
        engine.refresh_directory().await.unwrap();
        engine.open("u1").await.unwrap();

        assert!(engine.send("u1", "FAILED BODY").await.is_err());

        let snapshot = engine.snapshot();
        let entry = snapshot.directory.get("u1").unwrap();
        assert_eq!(entry.last_message.as_deref(), Some("hi"));
        assert_eq!(entry.last_message_time, Some(Timestamp::from_millis(10)));
        assert!(snapshot.messages("u1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn push_folded_before_the_ack_leaves_one_copy() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_after(Duration::from_millis(200));
        transport.respond_with(|event| match event {
            ClientEvent::SendMessage(payload) => {
                let mut confirmed = message("99", "op", Some("u7"), SenderRole::Operator, &payload.message, 0);
                confirmed.created_at = Timestamp::now();
                confirmed.updated_at = confirmed.created_at;
                Ok(success(&confirmed))
            }
            _ => Ok(json!({"status": "success"})),
        });
        let engine = engine(session, MockBootstrapApi::new());

        let sending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send("u7", "on my way").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let timeline = engine.snapshot().messages("u7").to_vec();
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].is_pending());

        let mut push = message("99", "op", Some("u7"), SenderRole::Operator, "on my way", 0);
        push.created_at = Timestamp::now();
        push.updated_at = push.created_at;
        let folded = engine.fold_message(push);
        assert!(!folded.first_contact);
        let after_push: Vec<String> = engine
            .snapshot()
            .messages("u7")
            .iter()
            .map(|message| message.id.as_str().to_string())
            .collect();
        assert_eq!(after_push, ["99"]);

        let confirmed = sending.await.unwrap().unwrap();

        assert_eq!(confirmed.id.as_str(), "99");
        let snapshot = engine.snapshot();
        let timeline = snapshot.messages("u7");
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].id.as_str(), "99");
    }

    #[tokio::test]
    async fn send_requires_registration_and_content() {
        let transport = Arc::new(crate::test_support::ScriptedTransport::default());
        let session = ConnectionSession::new(customer(), transport.clone(), &SyncConfig::default());
        let engine = engine(session, MockBootstrapApi::new());

        assert!(matches!(engine.send(SUPPORT_POOL_ID, "   ").await, Err(ChatError::EmptyMessage)));
        assert!(matches!(engine.send(SUPPORT_POOL_ID, "hi").await, Err(ChatError::NotConnected)));
        assert!(engine.snapshot().messages(SUPPORT_POOL_ID).is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn open_loads_and_marks_inbound_read() {
        let (session, transport) = registered_session(operator()).await;
        let history = vec![
            message("1", "u7", None, SenderRole::Customer, "a", 0),
            message("2", "u7", None, SenderRole::Customer, "b", 1),
        ];
        transport.respond_with(move |event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&history)),
            _ => Ok(json!({"status": "success"})),
        });
        let engine = engine(session, MockBootstrapApi::new());

        let messages = engine.open("u7").await.unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|message| message.is_read));
        assert_eq!(transport.mark_read_requests().len(), 2);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.active.as_deref(), Some("u7"));
        assert_eq!(snapshot.directory.get("u7").unwrap().unread_count, 0);

        engine.close();
        assert_eq!(engine.snapshot().directory.get("u7").unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn refresh_directory_merges_listing() {
        let (session, _) = registered_session(operator()).await;
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap.expect_conversations().times(1).returning(|| {
            Ok(vec![ConversationSummary {
                counterpart_id: "u1".into(),
                display_name: "Ada".into(),
                email: None,
                avatar: None,
                last_message: Some("hello".into()),
                last_message_time: Some(Timestamp::from_millis(10)),
                unread_count: 2,
            }])
        });
        let engine = engine(session, bootstrap);

        engine.refresh_directory().await.unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.directory.get("u1").unwrap().display_name, "Ada");
        assert_eq!(snapshot.directory.total_unread(), 2);
    }

    #[tokio::test]
    async fn preload_loads_every_conversation() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(payload) if payload.user_id == "broken" => {
                Ok(json!({"status": "error"}))
            }
            ClientEvent::GetConversation(payload) => Ok(success(&vec![message(
                &format!("m-{}", payload.user_id),
                &payload.user_id,
                None,
                SenderRole::Customer,
                "hi",
                0,
            )])),
            _ => Ok(json!({"status": "success"})),
        });
        let engine = engine(session, MockBootstrapApi::new());

        let loaded = engine
            .preload(vec!["u1".into(), "u2".into(), "broken".into(), "u3".into()])
            .await;

        assert_eq!(loaded, 3);
        let snapshot = engine.snapshot();
        for id in ["u1", "u2", "u3"] {
            assert!(snapshot.timeline(id).unwrap().is_loaded());
        }
        assert!(snapshot.timeline("broken").is_none());
    }

    #[tokio::test]
    async fn warm_start_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let (session, _) = registered_session(operator()).await;
        let first = SyncEngine::new(
            Arc::clone(&session),
            Arc::new(MockBootstrapApi::new()),
            Some(WarmStartStore::new(dir.path())),
            &SyncConfig::default(),
        );
        first.fold_message(message("1", "u7", None, SenderRole::Customer, "hi", 0));
        first.persist().await;

        let second = SyncEngine::new(
            session,
            Arc::new(MockBootstrapApi::new()),
            Some(WarmStartStore::new(dir.path())),
            &SyncConfig::default(),
        );
        assert!(second.warm_start().await);
        let snapshot = second.snapshot();
        assert!(snapshot.stale);
        assert_eq!(snapshot.messages("u7").len(), 1);
    }

    #[tokio::test]
    async fn failed_resync_leaves_state_stale() {
        let (session, _) = registered_session(operator()).await;
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap
            .expect_conversations()
            .times(1)
            .returning(|| Err(BootstrapError::Unsuccessful("conversations")));
        let engine = engine(session, bootstrap);
        engine.mark_stale();

        let err = engine.resync(ResyncScope::Directory).await.unwrap_err();

        assert!(matches!(err, ChatError::Bootstrap(_)));
        assert!(err.is_retryable());
        assert!(engine.snapshot().stale);
    }
}
