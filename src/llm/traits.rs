//! LLM 客户端抽象
//!
//! 远端补全能力被视为黑盒：给定 system 指令、有序历史与采样参数，返回文本或带类别的错误。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 提供方报告的错误类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderCategory {
    Quota,
    Auth,
    RateLimit,
    Connection,
    Other,
}

impl std::fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderCategory::Quota => "quota",
            ProviderCategory::Auth => "auth",
            ProviderCategory::RateLimit => "rate_limit",
            ProviderCategory::Connection => "connection",
            ProviderCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// 远端调用失败：类别 + 提供方原始错误文本
#[derive(Error, Debug, Clone)]
#[error("[{category}] {message}")]
pub struct LlmError {
    pub category: ProviderCategory,
    pub message: String,
}

impl LlmError {
    pub fn new(category: ProviderCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

/// 一次补全请求
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub system: String,
    /// 历史 + 本轮 user 消息，按时间顺序
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// system 在前、其余按序的完整消息列表
    pub fn full_messages(&self) -> Vec<Message> {
        std::iter::once(Message::system(self.system.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }
}

/// LLM 客户端 trait：单次非流式补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}
