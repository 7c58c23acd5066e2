//! Folding of incoming messages into an ordered, deduplicated timeline.
//!
//! Confirmed messages are unique by id. A pending (optimistic) message is
//! dropped as soon as a confirmed message from the same sender with the same
//! body lands within the supersede window of it, because the remote system
//! may deliver the push for a send before or after the send's own ack.

use std::collections::{HashMap, HashSet};

use chrono::TimeDelta;
use shared::models::{Message, MessageId};
use tracing::error;

/// Default tolerance between an optimistic client timestamp and the
/// server-assigned one.
pub const DEFAULT_SUPERSEDE_WINDOW_MS: i64 = 5_000;

/// Timeline merge with a configurable supersede window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    window: TimeDelta,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(TimeDelta::milliseconds(DEFAULT_SUPERSEDE_WINDOW_MS))
    }
}

impl Reconciler {
    #[must_use]
    pub const fn new(window: TimeDelta) -> Self {
        Self { window }
    }

    #[must_use]
    pub const fn window(&self) -> TimeDelta {
        self.window
    }

    /// Fold one incoming message into `timeline`.
    #[must_use]
    pub fn reconcile(&self, timeline: &[Message], incoming: Message) -> Vec<Message> {
        self.reconcile_all(timeline, std::iter::once(incoming))
    }

    /// Fold a batch of messages (a fetched conversation, a resync) into
    /// `timeline`. Equivalent to calling [`Self::reconcile`] once per message.
    #[must_use]
    pub fn reconcile_all(
        &self,
        timeline: &[Message],
        incoming: impl IntoIterator<Item = Message>,
    ) -> Vec<Message> {
        let mut confirmed: Vec<Message> = Vec::with_capacity(timeline.len() + 1);
        let mut positions: HashMap<MessageId, usize> = HashMap::new();
        let mut pending: Vec<Message> = Vec::new();
        let mut pending_ids: HashSet<MessageId> = HashSet::new();

        for message in timeline {
            if message.is_pending() {
                if pending_ids.insert(message.id.clone()) {
                    pending.push(message.clone());
                }
            } else if let Some(&index) = positions.get(&message.id) {
                error!(
                    message_id = %message.id,
                    kept_body = %confirmed[index].body,
                    dropped_body = %message.body,
                    "timeline holds two confirmed messages with the same id"
                );
            } else {
                positions.insert(message.id.clone(), confirmed.len());
                confirmed.push(message.clone());
            }
        }

        for message in incoming {
            if message.is_pending() {
                if pending_ids.insert(message.id.clone()) {
                    pending.push(message);
                }
                continue;
            }

            match positions.get(&message.id) {
                // Redelivery: only a newer server revision replaces the local copy.
                Some(&index) => {
                    if message.updated_at > confirmed[index].updated_at {
                        confirmed[index] = message;
                    }
                }
                None => {
                    positions.insert(message.id.clone(), confirmed.len());
                    confirmed.push(message);
                }
            }
        }

        pending.retain(|candidate| {
            !confirmed
                .iter()
                .any(|message| self.supersedes(message, candidate))
        });

        let mut merged = confirmed;
        merged.extend(pending);
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        merged
    }

    /// Whether `confirmed` is the server's copy of the optimistic `pending` send.
    #[must_use]
    pub fn supersedes(&self, confirmed: &Message, pending: &Message) -> bool {
        confirmed.sender_id == pending.sender_id
            && confirmed.body == pending.body
            && confirmed.created_at.abs_diff(&pending.created_at) < self.window
    }
}

/// Drop the message with `id` (a failed pending send) from `timeline`.
#[must_use]
pub fn remove_message(timeline: &[Message], id: &MessageId) -> Vec<Message> {
    timeline
        .iter()
        .filter(|message| &message.id != id)
        .cloned()
        .collect()
}

/// [`Reconciler::reconcile`] with the default window.
#[must_use]
pub fn reconcile(timeline: &[Message], incoming: Message) -> Vec<Message> {
    Reconciler::default().reconcile(timeline, incoming)
}
