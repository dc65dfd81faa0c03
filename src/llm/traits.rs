//! LLM 客户端抽象
//!
//! Worker 只依赖 LlmClient::complete；任何失败都由调用方降级为确定性实现。

use async_trait::async_trait;

use crate::core::LlmError;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// 一条对话消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成，调用本身有超时上限
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 单条用户提示
    async fn prompt(&self, text: &str) -> Result<String, LlmError> {
        self.complete(&[Message::user(text)]).await
    }
}
