use serde::{Deserialize, Serialize};

use super::{Message, Timestamp};

/// One row of the `GET /conversations` bootstrap listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The other participant. Older deployments send `userId`.
    #[serde(alias = "userId")]
    pub counterpart_id: String,

    #[serde(alias = "name")]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default)]
    pub last_message: Option<String>,

    #[serde(default)]
    pub last_message_time: Option<Timestamp>,

    #[serde(default)]
    pub unread_count: u32,
}

/// Body of `GET /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationsResponse {
    pub success: bool,
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

/// Body of `GET /messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagesResponse {
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}
