use serde::{Deserialize, Serialize};

use super::{Message, SenderRole};

/// Directory key under which a customer sees the whole support pool.
pub const SUPPORT_POOL_ID: &str = "support";

/// The authenticated participant a chat session runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub role: SenderRole,
}

impl Participant {
    pub fn new(id: impl Into<String>, role: SenderRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    #[must_use]
    pub fn is_operator(&self) -> bool {
        self.role == SenderRole::Operator
    }

    /// Directory key of the counterpart a message belongs to.
    ///
    /// Customers only ever talk to the support pool. Operators key their
    /// directory by customer: the sender when a customer wrote the message,
    /// otherwise the addressed customer. Operator messages without a receiver
    /// fall back to the sender.
    #[must_use]
    pub fn counterpart_of(&self, message: &Message) -> String {
        if !self.is_operator() {
            return SUPPORT_POOL_ID.to_string();
        }

        if message.sender_role == self.role.counterpart() {
            return message.sender_id.clone();
        }

        message
            .receiver_id
            .clone()
            .unwrap_or_else(|| message.sender_id.clone())
    }

    /// Id passed to `getConversation` when loading `counterpart_id`'s timeline.
    /// Customers fetch their own conversation with the pool.
    #[must_use]
    pub fn conversation_query_id<'a>(&'a self, counterpart_id: &'a str) -> &'a str {
        if self.is_operator() {
            counterpart_id
        } else {
            &self.id
        }
    }

    /// Receiver id to address when sending to `counterpart_id`.
    #[must_use]
    pub fn receiver_for(&self, counterpart_id: &str) -> Option<String> {
        if self.is_operator() {
            Some(counterpart_id.to_string())
        } else {
            None
        }
    }
}
