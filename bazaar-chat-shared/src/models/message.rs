use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use super::Timestamp;

/// Prefix that marks a locally generated, not yet confirmed message id.
pub const PENDING_ID_PREFIX: &str = "temp_";

/// Identifier of a chat message, either confirmed by the remote system or
/// pending (locally generated with [`PENDING_ID_PREFIX`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Provisional id for an optimistic send created at `millis`.
    #[must_use]
    pub fn pending(millis: i64) -> Self {
        Self(format!("{PENDING_ID_PREFIX}{millis}"))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_ID_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of a support conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderRole {
    /// Marketplace customer. Serialized as `user`.
    #[serde(rename = "user", alias = "customer")]
    Customer,
    /// Support operator. Serialized as `admin`.
    #[serde(rename = "admin", alias = "operator")]
    Operator,
}

impl SenderRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "user",
            Self::Operator => "admin",
        }
    }

    /// Role of the participant on the other side of a conversation.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Customer => Self::Operator,
            Self::Operator => Self::Customer,
        }
    }
}

impl Display for SenderRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderRole {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" | "customer" => Ok(Self::Customer),
            "admin" | "operator" => Ok(Self::Operator),
            _ => Err("invalid sender role"),
        }
    }
}

/// A single chat message as exchanged with the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,

    pub sender_id: String,

    /// `None` addresses the whole support pool (broadcast). The remote system
    /// uses both `null` and `""` for this.
    #[serde(default, deserialize_with = "deserialize_receiver")]
    pub receiver_id: Option<String>,

    #[serde(rename = "message")]
    pub body: String,

    pub sender_role: SenderRole,

    #[serde(default)]
    pub is_read: bool,

    pub created_at: Timestamp,

    pub updated_at: Timestamp,
}

impl Message {
    /// Optimistic local copy of a send that has not been acknowledged yet.
    #[must_use]
    pub fn pending(
        id: MessageId,
        sender_id: impl Into<String>,
        receiver_id: Option<String>,
        body: impl Into<String>,
        sender_role: SenderRole,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id: sender_id.into(),
            receiver_id,
            body: body.into(),
            sender_role,
            is_read: false,
            created_at,
            updated_at: created_at,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_none()
    }

    /// Whether the message was addressed to `viewer_id` (directly or through
    /// the broadcast pool) by someone else.
    #[must_use]
    pub fn is_inbound_for(&self, viewer_id: &str) -> bool {
        self.sender_id != viewer_id
            && self
                .receiver_id
                .as_deref()
                .is_none_or(|receiver| receiver == viewer_id)
    }

    /// Inbound for `viewer_id` and not yet marked read.
    #[must_use]
    pub fn is_unread_for(&self, viewer_id: &str) -> bool {
        !self.is_read && self.is_inbound_for(viewer_id)
    }
}

fn deserialize_receiver<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|receiver| !receiver.is_empty()))
}
