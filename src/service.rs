//! 对话服务
//!
//! 供 HTTP 等前端调用的无界面对话逻辑：resolve 会话 → 取历史 → 限时生成回复 → 追加本轮问答。
//! 模型调用期间不持有任何存储锁；调用失败或超时时不追加任何消息。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::core::{ChatError, CompletionOrchestrator};
use crate::memory::ConversationStore;

/// 一次对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_count: usize,
}

/// 会话存储 + 回复编排，可多请求共享
pub struct ChatService {
    store: Arc<ConversationStore>,
    orchestrator: CompletionOrchestrator,
    /// 等待模型回复的上限
    request_timeout: Duration,
}

impl ChatService {
    pub fn new(store: Arc<ConversationStore>, orchestrator: CompletionOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let store = Arc::new(ConversationStore::from_config(&cfg.conversation));
        let orchestrator = CompletionOrchestrator::from_config(&cfg.llm);
        Self::new(store, orchestrator)
            .with_request_timeout(Duration::from_secs(cfg.server.request_timeout_secs))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn is_offline(&self) -> bool {
        self.orchestrator.is_offline()
    }

    /// 处理一条客户消息，返回回复与（可能新建的）会话 ID
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        customer_name: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".to_string()));
        }

        let id = self.store.resolve(conversation_id).await;
        let history = self.store.history(&id).await;

        let reply = self
            .orchestrator
            .generate_reply(message, &history, customer_name);
        let answer = match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(conversation_id = %id, "Completion timed out after {:?}", self.request_timeout);
                return Err(ChatError::ConnectionFailure(format!(
                    "no reply within {}s",
                    self.request_timeout.as_secs_f32()
                )));
            }
        };

        let (id, message_count) = match self.store.append_exchange(&id, message, &answer).await {
            Ok(count) => (id, count),
            Err(ChatError::NotFound(_)) => {
                // 调用模型期间会话被清理，回复仍然交付，问答存入新会话
                let fresh = self.store.resolve(None).await;
                tracing::warn!(
                    conversation_id = %id,
                    new_conversation_id = %fresh,
                    "Conversation removed while awaiting reply, storing exchange in a new one"
                );
                let count = self.store.append_exchange(&fresh, message, &answer).await?;
                (fresh, count)
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            conversation_id = %id,
            "Response generated - message count: {}",
            message_count
        );

        Ok(ChatReply {
            answer,
            conversation_id: id,
            timestamp: Utc::now(),
            message_count,
        })
    }
}
