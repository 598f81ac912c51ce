//! 会话记忆：append-only 对话历史

pub mod conversation;

pub use conversation::{shared_conversation, Conversation, Message, Role, SharedConversation};
