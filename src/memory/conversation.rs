//! 对话历史（append-only）
//!
//! 会话内的消息序列只增不改：每轮追加 user / assistant / system / tool 消息，
//! 进程退出即丢弃，不做持久化与剪枝。部署驱动持有 SharedConversation 句柄，
//! 在流式输出时逐行追加 Tool 消息（单轮串行契约下无并发写者）。

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 对齐；Tool 为工具结果）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// 对话历史：append-only 消息序列
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 跨组件共享的对话句柄：调度器拥有回合，部署驱动借用以逐行写入
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// 创建空的共享对话
pub fn shared_conversation() -> SharedConversation {
    Arc::new(Mutex::new(Conversation::new()))
}
