//! 回复编排：构造发往模型的消息序列、单次调用远端、错误归类、离线模拟回复
//!
//! 不做重试；失败一律以 ChatError 的某个分类返回，由调用方决定后续处理。

use std::sync::Arc;

use crate::config::LlmSection;
use crate::core::ChatError;
use crate::llm::{
    category_from_text, mock_reply, CompletionRequest, LlmClient, LlmError, OpenAiClient,
    ProviderCategory,
};
use crate::memory::Message;

/// 客服人设（固定，不受用户输入影响）
pub const SYSTEM_PROMPT: &str = "You are a professional, friendly, and helpful customer service representative.
Your role is to assist customers with their inquiries, resolve issues, and provide excellent service.

Guidelines:
- Be polite, empathetic, and professional at all times
- Listen carefully to customer concerns and address them directly
- Provide clear, concise, and accurate information
- If you don't know something, admit it and offer to find the answer
- Use a warm, conversational tone while maintaining professionalism
- Ask clarifying questions when needed to better understand the customer's needs
- Offer solutions proactively when possible
- Thank customers for their patience and business

Remember: Your goal is to make every customer interaction positive and helpful.";

/// 本轮 user 消息；有称呼时加上 `[Customer: <name>]` 前缀（仅出现在请求中，不入库）
pub fn annotate_user_message(user_message: &str, speaker_name: Option<&str>) -> String {
    match speaker_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("[Customer: {}] {}", name, user_message),
        None => user_message.to_string(),
    }
}

/// 将提供方错误归入固定分类；同一类别与文本总得到同一结果
pub fn classify(err: &LlmError) -> ChatError {
    let from_text = category_from_text(&err.message);
    if err.category == ProviderCategory::Quota || from_text == ProviderCategory::Quota {
        return ChatError::QuotaExceeded;
    }
    match err.category {
        ProviderCategory::Auth => ChatError::InvalidCredentials,
        ProviderCategory::RateLimit => ChatError::RateLimited,
        ProviderCategory::Connection => ChatError::ConnectionFailure(err.message.clone()),
        ProviderCategory::Quota | ProviderCategory::Other => match from_text {
            ProviderCategory::Auth => ChatError::InvalidCredentials,
            ProviderCategory::RateLimit => ChatError::RateLimited,
            _ => ChatError::ProviderError(err.message.clone()),
        },
    }
}

/// 回复编排器：持有远端客户端（可无）与固定采样参数，可多请求共享
pub struct CompletionOrchestrator {
    client: Option<Arc<dyn LlmClient>>,
    offline: bool,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionOrchestrator {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            client: Some(client),
            offline: false,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature,
            max_tokens,
        }
    }

    /// 无远端客户端：总是返回模拟回复
    pub fn offline() -> Self {
        let defaults = LlmSection::default();
        Self {
            client: None,
            offline: true,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    /// 根据配置创建：offline_mode 或缺少 API Key 时走离线模式
    pub fn from_config(cfg: &LlmSection) -> Self {
        if cfg.offline_mode {
            tracing::info!("Running in offline mode - using mock responses");
            return Self::offline().with_sampling(cfg.temperature, cfg.max_tokens);
        }
        match cfg.resolved_api_key() {
            Some(key) => {
                tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
                let client = OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, &key);
                Self::new(Arc::new(client), cfg.temperature, cfg.max_tokens)
            }
            None => {
                tracing::warn!("No API key found - using mock responses");
                Self::offline().with_sampling(cfg.temperature, cfg.max_tokens)
            }
        }
    }

    pub fn with_offline_mode(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.offline || self.client.is_none()
    }

    /// 构造补全请求：system + 历史 + 本轮（带称呼注释的）user 消息
    pub fn build_request(
        &self,
        user_message: &str,
        history: &[Message],
        speaker_name: Option<&str>,
    ) -> CompletionRequest {
        let mut messages = history.to_vec();
        messages.push(Message::user(annotate_user_message(user_message, speaker_name)));
        CompletionRequest {
            system: self.system_prompt.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// 生成回复：成功返回去除首尾空白的文本，失败返回分类后的错误
    pub async fn generate_reply(
        &self,
        user_message: &str,
        history: &[Message],
        speaker_name: Option<&str>,
    ) -> Result<String, ChatError> {
        if user_message.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".to_string()));
        }

        let client = match &self.client {
            Some(client) if !self.offline => client,
            _ => {
                tracing::info!("Using mock response (offline mode or no API key)");
                return Ok(mock_reply(user_message, speaker_name));
            }
        };

        let request = self.build_request(user_message, history, speaker_name);
        match client.complete(&request).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    tracing::error!("Model returned an empty completion");
                    return Err(ChatError::ProviderError(
                        "model returned an empty completion".to_string(),
                    ));
                }
                tracing::info!("Response generated successfully (length: {})", text.len());
                Ok(text.to_string())
            }
            Err(e) => {
                let classified = classify(&e);
                tracing::error!(kind = classified.kind(), "Completion failed: {}", e);
                Err(classified)
            }
        }
    }
}
