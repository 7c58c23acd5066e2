//! Control events exchanged over the persistent chat connection.
//!
//! Every client event except `register` is answered with an [`Ack`]. The
//! remote system pushes [`ServerEvent`]s without expecting an answer.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use super::{Message, MessageId, SenderRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: String,
    pub role: SenderRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: String,
    /// `None` broadcasts to the support pool.
    pub receiver_id: Option<String>,
    pub message: String,
    pub sender_role: SenderRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    pub message_id: MessageId,
}

/// Client → remote control events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Register(RegisterPayload),
    SendMessage(SendMessagePayload),
    GetConversation(GetConversationPayload),
    MarkAsRead(MarkAsReadPayload),
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::SendMessage(_) => "sendMessage",
            Self::GetConversation(_) => "getConversation",
            Self::MarkAsRead(_) => "markAsRead",
        }
    }

    /// `register` is fire-and-forget; everything else is request/ack.
    #[must_use]
    pub const fn expects_ack(&self) -> bool {
        !matches!(self, Self::Register(_))
    }
}

/// Remote → client pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
}

/// Acknowledgment of a request/ack control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Ack {
    Success {
        #[serde(default)]
        data: Value,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("malformed acknowledgment: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Ack {
    /// Parse a raw acknowledgment value.
    ///
    /// # Errors
    /// Returns [`AckError::Malformed`] when the value is not an ack envelope.
    pub fn from_value(value: Value) -> Result<Self, AckError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Convert the ack into its typed payload.
    ///
    /// # Errors
    /// Returns [`AckError::Rejected`] for error acks and
    /// [`AckError::Malformed`] when the payload does not match `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, AckError> {
        match self {
            Self::Success { data } => Ok(serde_json::from_value(data)?),
            Self::Error { message } => Err(AckError::Rejected(
                message.unwrap_or_else(|| "unspecified error".to_string()),
            )),
        }
    }
}
