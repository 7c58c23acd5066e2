pub mod conversation;
pub mod errors;
pub mod message;
pub mod participant;
pub mod protocol;
pub mod timestamp;

pub use conversation::{ConversationSummary, ConversationsResponse, MessagesResponse};
pub use errors::ErrorResponse;
pub use message::{Message, MessageId, PENDING_ID_PREFIX, SenderRole};
pub use participant::{Participant, SUPPORT_POOL_ID};
pub use protocol::{
    Ack, AckError, ClientEvent, GetConversationPayload, MarkAsReadPayload, RegisterPayload,
    SendMessagePayload, ServerEvent,
};
pub use timestamp::Timestamp;
