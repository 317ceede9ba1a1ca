//! 记忆层：会话与会话存储

pub mod conversation;
pub mod store;

pub use conversation::{Conversation, Message, Role, StoredMessage, CONVERSATION_ID_PREFIX};
pub use store::{spawn_sweeper, ConversationSnapshot, ConversationStore};
