//! 对话错误类型
//!
//! 会话存储与回复编排共用一套分类；HTTP 层据此映射状态码，核心层不关心状态码。

use thiserror::Error;

/// 会话 / 回复过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Model provider quota exceeded, check billing and plan")]
    QuotaExceeded,

    #[error("Invalid model provider credentials")]
    InvalidCredentials,

    #[error("Rate limit exceeded, try again in a moment")]
    RateLimited,

    #[error("Connection to model provider failed: {0}")]
    ConnectionFailure(String),

    #[error("Model provider error: {0}")]
    ProviderError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ChatError {
    /// 机器可读的错误类别（写入日志与错误响应）
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::QuotaExceeded => "quota_exceeded",
            ChatError::InvalidCredentials => "invalid_credentials",
            ChatError::RateLimited => "rate_limited",
            ChatError::ConnectionFailure(_) => "connection_failure",
            ChatError::ProviderError(_) => "provider_error",
            ChatError::Validation(_) => "validation_error",
            ChatError::Config(_) => "config_error",
        }
    }
}
