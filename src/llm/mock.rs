//! Mock LLM 客户端（无 API Key 时的回退，测试可用）
//!
//! 取最后一条 User 消息，回显为 echo 工具调用 JSON，便于本地跑通调度循环。

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            r#"{{"tool": "echo", "args": {{"text": "Echo from Mock: {}"}}}}"#,
            last_user
        ))
    }
}
