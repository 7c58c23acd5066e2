//! Immutable chat state snapshots and the store that publishes them.
//!
//! Every change derives a new [`ChatState`] from the previous one and swaps
//! it in atomically; readers hold an `Arc` of a consistent snapshot.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use shared::models::{ConversationSummary, Message, MessageId, Participant};
use tokio::sync::watch;

use crate::{cache::Timeline, directory::ConversationDirectory, reconciler::Reconciler};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub timelines: HashMap<String, Arc<Timeline>>,
    pub directory: ConversationDirectory,
    /// Counterpart whose conversation is on screen.
    pub active: Option<String>,
    /// Set while disconnected; cleared by a successful resync.
    pub stale: bool,
}

/// Where a live message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folded {
    pub counterpart_id: String,
    /// The counterpart had no directory entry before this message.
    pub first_contact: bool,
}

impl ChatState {
    #[must_use]
    pub fn timeline(&self, counterpart_id: &str) -> Option<&Timeline> {
        self.timelines.get(counterpart_id).map(Arc::as_ref)
    }

    #[must_use]
    pub fn messages(&self, counterpart_id: &str) -> &[Message] {
        self.timeline(counterpart_id)
            .map(Timeline::messages)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_active(&self, counterpart_id: &str) -> bool {
        self.active.as_deref() == Some(counterpart_id)
    }

    /// Find a cached message and the counterpart it belongs to.
    #[must_use]
    pub fn locate(&self, message_id: &MessageId) -> Option<(&str, &Message)> {
        self.timelines.iter().find_map(|(counterpart, timeline)| {
            timeline
                .find(message_id)
                .map(|message| (counterpart.as_str(), message))
        })
    }

    /// Reconcile a live message into its timeline and the directory.
    #[must_use]
    pub fn with_message(
        &self,
        message: Message,
        viewer: &Participant,
        reconciler: &Reconciler,
    ) -> (Self, Folded) {
        let counterpart_id = viewer.counterpart_of(&message);
        let first_contact = !self.directory.contains(&counterpart_id);

        let mut next = self.clone();
        let timeline = self
            .timeline(&counterpart_id)
            .cloned()
            .unwrap_or_default()
            .reconciled(reconciler, vec![message.clone()]);
        next.directory =
            self.directory
                .apply_message(&message, viewer, Some(&timeline), self.active.as_deref());
        next.timelines
            .insert(counterpart_id.clone(), Arc::new(timeline));

        (
            next,
            Folded {
                counterpart_id,
                first_contact,
            },
        )
    }

    /// Replace a pending send with its confirmed copy in one step.
    #[must_use]
    pub fn with_confirmed_send(
        &self,
        pending_id: &MessageId,
        confirmed: Message,
        viewer: &Participant,
        reconciler: &Reconciler,
    ) -> Self {
        let (next, _) = self
            .without_message(pending_id, viewer)
            .with_message(confirmed, viewer, reconciler);
        next
    }

    /// Fold an authoritative history fetch into `counterpart_id`'s timeline.
    #[must_use]
    pub fn with_fetched_timeline(
        &self,
        counterpart_id: &str,
        fetched: Vec<Message>,
        viewer: &Participant,
        reconciler: &Reconciler,
    ) -> Self {
        let mut next = self.clone();
        let timeline = self
            .timeline(counterpart_id)
            .cloned()
            .unwrap_or_default()
            .reconciled(reconciler, fetched)
            .mark_loaded();
        next.directory = self.directory.sync_timeline(
            counterpart_id,
            &timeline,
            viewer,
            self.active.as_deref(),
        );
        next.timelines
            .insert(counterpart_id.to_string(), Arc::new(timeline));
        next
    }

    /// Drop a message (a failed pending send).
    #[must_use]
    pub fn without_message(&self, message_id: &MessageId, viewer: &Participant) -> Self {
        let Some((counterpart_id, _)) = self.locate(message_id) else {
            return self.clone();
        };
        let counterpart_id = counterpart_id.to_string();

        let mut next = self.clone();
        let timeline = next
            .timeline(&counterpart_id)
            .map(|timeline| timeline.without(message_id))
            .unwrap_or_default();
        next.directory = self.directory.sync_timeline(
            &counterpart_id,
            &timeline,
            viewer,
            self.active.as_deref(),
        );
        next.timelines.insert(counterpart_id, Arc::new(timeline));
        next
    }

    /// Flip `is_read` on a message and re-derive its counterpart's unread count.
    #[must_use]
    pub fn with_read(&self, message_id: &MessageId, viewer: &Participant) -> Self {
        let Some((counterpart_id, _)) = self.locate(message_id) else {
            return self.clone();
        };
        let counterpart_id = counterpart_id.to_string();

        let mut next = self.clone();
        let timeline = next
            .timeline(&counterpart_id)
            .map(|timeline| timeline.with_read(message_id))
            .unwrap_or_default();
        next.timelines.insert(counterpart_id, Arc::new(timeline));
        next.directory =
            self.directory
                .recompute_unread(&next.timelines, viewer, self.active.as_deref());
        next
    }

    #[must_use]
    pub fn with_active(&self, active: Option<String>, viewer: &Participant) -> Self {
        let mut next = self.clone();
        next.active = active;
        next.directory =
            self.directory
                .recompute_unread(&next.timelines, viewer, next.active.as_deref());
        next
    }

    /// Merge a bootstrap directory listing. A selection that is no longer
    /// listed is cleared.
    #[must_use]
    pub fn with_directory_listing(
        &self,
        summaries: Vec<ConversationSummary>,
        viewer: &Participant,
    ) -> Self {
        let mut next = self.clone();
        next.directory = self.directory.merge_listing(
            summaries,
            &self.timelines,
            viewer,
            self.active.as_deref(),
        );
        if next
            .active
            .as_deref()
            .is_some_and(|active| !next.directory.contains(active))
        {
            next.active = None;
        }
        next
    }

    /// Going stale keeps every message but demotes all timelines to partial,
    /// so the next load re-fetches them and bootstrap counts apply again.
    #[must_use]
    pub fn with_stale(&self, stale: bool) -> Self {
        let mut next = self.clone();
        next.stale = stale;
        if stale {
            next.timelines = self
                .timelines
                .iter()
                .map(|(counterpart, timeline)| {
                    (
                        counterpart.clone(),
                        Arc::new(timeline.as_ref().clone().mark_unloaded()),
                    )
                })
                .collect();
        }
        next
    }
}

/// Publishes [`ChatState`] snapshots to any number of readers.
#[derive(Debug, Clone)]
pub struct ChatStore {
    sender: Arc<watch::Sender<Arc<ChatState>>>,
    writer: Arc<Mutex<()>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(ChatState::default())
    }

    #[must_use]
    pub fn with_state(state: ChatState) -> Self {
        let (sender, _) = watch::channel(Arc::new(state));
        Self {
            sender: Arc::new(sender),
            writer: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ChatState> {
        Arc::clone(&self.sender.borrow())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatState>> {
        self.sender.subscribe()
    }

    /// Derive and publish the next state. Writers are serialized, so `derive`
    /// always sees the latest snapshot. `derive` must not touch the store.
    pub fn update<R>(&self, derive: impl FnOnce(&ChatState) -> (ChatState, R)) -> R {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let (next, result) = derive(&current);
        self.sender.send_replace(Arc::new(next));
        result
    }

    pub fn apply(&self, derive: impl FnOnce(&ChatState) -> ChatState) {
        self.update(|state| (derive(state), ()));
    }
}
