//! 请求 / 响应结构与入参校验

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ChatError;

/// 单条消息最大字符数
pub const MAX_MESSAGE_CHARS: usize = 2000;
/// 客户称呼最大字符数
pub const MAX_NAME_CHARS: usize = 100;

/// POST /api/v1/chat 请求体
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.message.trim().is_empty() {
            return Err(ChatError::Validation("message is required".to_string()));
        }
        if self.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::Validation(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        if self
            .customer_name
            .as_ref()
            .is_some_and(|n| n.chars().count() > MAX_NAME_CHARS)
        {
            return Err(ChatError::Validation(format!(
                "customer_name must be at most {} characters",
                MAX_NAME_CHARS
            )));
        }
        Ok(())
    }
}

/// GET /api/v1/health 响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub active_conversations: usize,
    pub offline_mode: bool,
}

/// DELETE /api/v1/conversation/:id 响应
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: &'static str,
    pub conversation_id: String,
}

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
