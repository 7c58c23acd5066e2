use std::time::Duration;

use shared::models::{AckError, MessageId};
use thiserror::Error;

use crate::{bootstrap::BootstrapError, storage::StorageError, transport::TransportError};

/// Errors surfaced by chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The session is not registered; nothing was sent.
    #[error("not connected to the chat service")]
    NotConnected,

    #[error("{event} timed out after {timeout:?}")]
    TimedOut {
        event: &'static str,
        timeout: Duration,
    },

    #[error("{event} rejected: {reason}")]
    Rejected { event: &'static str, reason: String },

    #[error("malformed {event} acknowledgment: {source}")]
    Protocol {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("message {0} is not in any cached timeline")]
    NotFound(MessageId),

    #[error("message {0} is already marked read")]
    AlreadyRead(MessageId),

    #[error("no conversation is selected")]
    NoActiveConversation,

    #[error("message body must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("bootstrap request failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("warm-start storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl ChatError {
    pub(crate) fn from_ack(event: &'static str, err: AckError) -> Self {
        match err {
            AckError::Rejected(reason) => Self::Rejected { event, reason },
            AckError::Malformed(source) => Self::Protocol { event, source },
        }
    }

    /// Whether repeating the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::TimedOut { .. } | Self::Transport(_) | Self::Bootstrap(_)
        )
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
