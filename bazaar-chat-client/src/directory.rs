//! Conversation directory: one entry per counterpart, most recent first.
//!
//! Every unread count is derived by [`derive_unread`]. Entries are never
//! mutated in place; each update returns a new directory.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::models::{ConversationSummary, Message, Participant, SUPPORT_POOL_ID, Timestamp};

use crate::cache::Timeline;

const PLACEHOLDER_PREFIX: &str = "User ";
const PLACEHOLDER_ID_CHARS: usize = 5;
const SUPPORT_DISPLAY_NAME: &str = "Support";

/// Newest preview that does not come from a pending send: the listing's
/// or a confirmed message's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SettledPreview {
    body: String,
    at: Timestamp,
}

impl SettledPreview {
    fn of(message: &Message) -> Option<Self> {
        (!message.is_pending()).then(|| Self {
            body: message.body.clone(),
            at: message.created_at,
        })
    }

    fn listed(body: Option<&String>, at: Option<Timestamp>) -> Option<Self> {
        Some(Self {
            body: body?.clone(),
            at: at?,
        })
    }

    fn newest(current: Option<Self>, candidate: Option<Self>) -> Option<Self> {
        match (current, candidate) {
            (Some(current), Some(candidate)) if candidate.at < current.at => Some(current),
            (current, None) => current,
            (_, candidate) => candidate,
        }
    }
}

/// One counterpart in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub counterpart_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<Timestamp>,
    pub unread_count: u32,
    /// Created locally from a first-contact message; awaiting enrichment.
    pub synthesized: bool,
    /// Unread messages reported by the bootstrap listing that are not part
    /// of the cached timeline.
    #[serde(default)]
    baseline_unread: u32,
    #[serde(default)]
    settled: Option<SettledPreview>,
}

impl Conversation {
    #[must_use]
    pub fn from_summary(summary: ConversationSummary) -> Self {
        let settled = SettledPreview::listed(summary.last_message.as_ref(), summary.last_message_time);
        Self {
            counterpart_id: summary.counterpart_id,
            display_name: summary.display_name,
            email: summary.email,
            avatar: summary.avatar,
            last_message: summary.last_message,
            last_message_time: summary.last_message_time,
            unread_count: summary.unread_count,
            synthesized: false,
            baseline_unread: summary.unread_count,
            settled,
        }
    }

    /// Placeholder entry for a counterpart first seen through `message`.
    #[must_use]
    pub fn synthesized(counterpart_id: &str, message: &Message) -> Self {
        Self {
            counterpart_id: counterpart_id.to_string(),
            display_name: placeholder_name(counterpart_id),
            email: None,
            avatar: None,
            last_message: Some(message.body.clone()),
            last_message_time: Some(message.created_at),
            unread_count: 0,
            synthesized: true,
            baseline_unread: 0,
            settled: SettledPreview::of(message),
        }
    }

    /// Preview from the newer of the timeline's last message and the settled
    /// preview. A pending send that left the timeline no longer shows.
    fn refresh_preview(&mut self, timeline: &Timeline) {
        let newest_confirmed = timeline
            .messages()
            .iter()
            .rev()
            .find(|message| !message.is_pending())
            .and_then(SettledPreview::of);
        self.settled = SettledPreview::newest(self.settled.take(), newest_confirmed);

        let from_timeline = timeline.last().map(|last| (&last.body, last.created_at));
        let settled = self.settled.as_ref().map(|preview| (&preview.body, preview.at));
        let newest = match (from_timeline, settled) {
            (Some(last), Some(settled)) if settled.1 > last.1 => Some(settled),
            (last, settled) => last.or(settled),
        };
        self.last_message = newest.map(|(body, _)| body.clone());
        self.last_message_time = newest.map(|(_, at)| at);
    }

    /// Rebase the bootstrap baseline so that `reported` stays the total
    /// unread count given what `timeline` already holds.
    fn rebase(&mut self, reported: u32, timeline: Option<&Timeline>, viewer_id: &str) {
        self.baseline_unread = match timeline {
            Some(timeline) if timeline.is_loaded() => 0,
            Some(timeline) => reported.saturating_sub(timeline.unread_for(viewer_id)),
            None => reported,
        };
    }
}

/// `"User "` followed by the first characters of the id. The support pool
/// gets a fixed name.
#[must_use]
pub fn placeholder_name(counterpart_id: &str) -> String {
    if counterpart_id == SUPPORT_POOL_ID {
        return SUPPORT_DISPLAY_NAME.to_string();
    }
    let short: String = counterpart_id.chars().take(PLACEHOLDER_ID_CHARS).collect();
    format!("{PLACEHOLDER_PREFIX}{short}")
}

/// Unread count of one entry.
///
/// The active conversation is being read, so it reports zero. A loaded
/// timeline is authoritative. Otherwise the bootstrap baseline covers what
/// the partial timeline does not hold.
fn derive_unread(
    entry: &Conversation,
    timeline: Option<&Timeline>,
    viewer_id: &str,
    active: Option<&str>,
) -> u32 {
    if active == Some(entry.counterpart_id.as_str()) {
        return 0;
    }
    match timeline {
        Some(timeline) if timeline.is_loaded() => timeline.unread_for(viewer_id),
        Some(timeline) => entry
            .baseline_unread
            .saturating_add(timeline.unread_for(viewer_id)),
        None => entry.baseline_unread,
    }
}

fn sort_by_recency(entries: &mut [Conversation]) {
    entries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
}

/// Conversations of one viewer, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDirectory {
    entries: Vec<Conversation>,
}

impl ConversationDirectory {
    #[must_use]
    pub fn from_summaries(summaries: Vec<ConversationSummary>) -> Self {
        let mut entries: Vec<Conversation> =
            summaries.into_iter().map(Conversation::from_summary).collect();
        sort_by_recency(&mut entries);
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[Conversation] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, counterpart_id: &str) -> Option<&Conversation> {
        self.entries
            .iter()
            .find(|entry| entry.counterpart_id == counterpart_id)
    }

    #[must_use]
    pub fn contains(&self, counterpart_id: &str) -> bool {
        self.get(counterpart_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.entries
            .iter()
            .fold(0, |total, entry| total.saturating_add(entry.unread_count))
    }

    /// Fold a live message (push or send) into the directory.
    ///
    /// `timeline` is the counterpart's timeline after the message was
    /// reconciled into it.
    #[must_use]
    pub fn apply_message(
        &self,
        message: &Message,
        viewer: &Participant,
        timeline: Option<&Timeline>,
        active: Option<&str>,
    ) -> Self {
        let counterpart_id = viewer.counterpart_of(message);
        let mut entries = self.entries.clone();

        let index = match entries
            .iter()
            .position(|entry| entry.counterpart_id == counterpart_id)
        {
            Some(index) => {
                let entry = &mut entries[index];
                entry.last_message = Some(message.body.clone());
                entry.last_message_time = Some(message.created_at);
                entry.settled = SettledPreview::newest(entry.settled.take(), SettledPreview::of(message));
                index
            }
            None => {
                entries.push(Conversation::synthesized(&counterpart_id, message));
                entries.len() - 1
            }
        };
        let unread = derive_unread(&entries[index], timeline, &viewer.id, active);
        entries[index].unread_count = unread;

        sort_by_recency(&mut entries);
        Self { entries }
    }

    /// Bring `counterpart_id`'s entry in line with its timeline: preview from
    /// the newer of the timeline's last message and the settled preview,
    /// unread count re-derived. Creates the entry when
    /// the timeline has messages but the directory does not know it yet.
    #[must_use]
    pub fn sync_timeline(
        &self,
        counterpart_id: &str,
        timeline: &Timeline,
        viewer: &Participant,
        active: Option<&str>,
    ) -> Self {
        let mut entries = self.entries.clone();
        let index = match entries
            .iter()
            .position(|entry| entry.counterpart_id == counterpart_id)
        {
            Some(index) => index,
            None => match timeline.last() {
                Some(last) => {
                    entries.push(Conversation::synthesized(counterpart_id, last));
                    entries.len() - 1
                }
                None => return self.clone(),
            },
        };

        // A placeholder whose only messages are gone (failed first send).
        if entries[index].synthesized && timeline.is_empty() {
            entries.remove(index);
            return Self { entries };
        }

        let entry = &mut entries[index];
        entry.refresh_preview(timeline);
        if timeline.is_loaded() {
            entry.baseline_unread = 0;
        }
        entry.unread_count = derive_unread(entry, Some(timeline), &viewer.id, active);

        sort_by_recency(&mut entries);
        Self { entries }
    }

    /// Re-derive every unread count, e.g. after the active conversation changed.
    #[must_use]
    pub fn recompute_unread(
        &self,
        timelines: &HashMap<String, Arc<Timeline>>,
        viewer: &Participant,
        active: Option<&str>,
    ) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                let timeline = timelines.get(&entry.counterpart_id).map(Arc::as_ref);
                entry.unread_count = derive_unread(&entry, timeline, &viewer.id, active);
                entry
            })
            .collect();
        Self { entries }
    }

    /// Merge a bootstrap listing.
    ///
    /// Listed entries take the listing's identity fields. The preview keeps
    /// whichever side is newer. Entries missing from the listing survive only
    /// while they have cached messages.
    #[must_use]
    pub fn merge_listing(
        &self,
        summaries: Vec<ConversationSummary>,
        timelines: &HashMap<String, Arc<Timeline>>,
        viewer: &Participant,
        active: Option<&str>,
    ) -> Self {
        let mut entries: Vec<Conversation> = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let reported = summary.unread_count;
            let mut entry = Conversation::from_summary(summary);
            if let Some(existing) = self.get(&entry.counterpart_id) {
                if existing.last_message_time > entry.last_message_time {
                    entry.last_message.clone_from(&existing.last_message);
                    entry.last_message_time = existing.last_message_time;
                }
                entry.settled = SettledPreview::newest(entry.settled.take(), existing.settled.clone());
            }
            let timeline = timelines.get(&entry.counterpart_id).map(Arc::as_ref);
            entry.rebase(reported, timeline, &viewer.id);
            entry.unread_count = derive_unread(&entry, timeline, &viewer.id, active);
            entries.push(entry);
        }

        for existing in &self.entries {
            let listed = entries
                .iter()
                .any(|entry| entry.counterpart_id == existing.counterpart_id);
            let has_messages = timelines
                .get(&existing.counterpart_id)
                .is_some_and(|timeline| !timeline.is_empty());
            if !listed && has_messages {
                entries.push(existing.clone());
            }
        }

        sort_by_recency(&mut entries);
        Self { entries }
    }

    /// Treat stored unread counts as reported totals against partial
    /// timelines. Used when restoring a warm-start snapshot.
    #[must_use]
    pub fn rebased(
        &self,
        timelines: &HashMap<String, Arc<Timeline>>,
        viewer: &Participant,
    ) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                let timeline = timelines.get(&entry.counterpart_id).map(Arc::as_ref);
                entry.rebase(entry.unread_count, timeline, &viewer.id);
                entry
            })
            .collect();
        Self { entries }
    }
}
