//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），并把 SDK 错误归入 ProviderCategory。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError, ProviderCategory};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config).with_backoff(single_attempt()),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }
}

/// SDK 默认会对 429 与 5xx 指数退避重试；这里每次调用只发一次请求，失败直接交给上层归类
fn single_attempt() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..Default::default()
    }
}

/// 按提供方错误文本中的关键字归类；quota/billing 优先于其它信号
pub fn category_from_text(text: &str) -> ProviderCategory {
    let lower = text.to_lowercase();
    if ["insufficient_quota", "quota", "billing"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ProviderCategory::Quota
    } else if ["invalid_api_key", "incorrect api key", "authentication", "unauthorized"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ProviderCategory::Auth
    } else if ["rate_limit", "rate limit", "too many requests"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ProviderCategory::RateLimit
    } else {
        ProviderCategory::Other
    }
}

fn to_llm_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let text = format!(
                "{} (type: {}, code: {:?})",
                api.message,
                api.r#type.as_deref().unwrap_or("unknown"),
                api.code
            );
            LlmError::new(category_from_text(&text), text)
        }
        OpenAIError::Reqwest(e) => LlmError::new(ProviderCategory::Connection, e.to_string()),
        other => LlmError::new(ProviderCategory::Other, other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let messages = Self::to_openai_messages(&request.full_messages()).map_err(to_llm_error)?;

        #[allow(deprecated)]
        let body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .top_p(1.0)
            .frequency_penalty(0.0)
            .presence_penalty(0.0)
            .build()
            .map_err(to_llm_error)?;

        tracing::info!("Calling chat completion API with model: {}", self.model);
        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(to_llm_error)?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Token usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_openai::error::ApiError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::core::{classify, ChatError};

    fn api_error(message: &str, r#type: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: r#type.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    /// 读完一个 HTTP 请求（请求头 + content-length 指定的请求体）
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + body_len {
                    return;
                }
            }
        }
    }

    /// 本地假端点：每个请求都回同一个状态与响应体，并计数
    async fn spawn_endpoint(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{addr}/v1"), hits)
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "persona".to_string(),
            messages: vec![Message::user("Hi")],
            temperature: 0.7,
            max_tokens: 50,
        }
    }

    async fn complete_against(base_url: &str) -> LlmError {
        let client = OpenAiClient::new(Some(base_url), "gpt-3.5-turbo", "sk-test");
        tokio::time::timeout(Duration::from_secs(5), client.complete(&request()))
            .await
            .expect("completion should not be retried until timeout")
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_rate_limit_is_single_attempt() {
        let (url, hits) = spawn_endpoint(
            "429 Too Many Requests",
            r#"{"error":{"message":"Rate limit reached for requests","type":"requests","param":null,"code":"rate_limit_exceeded"}}"#,
        )
        .await;

        let err = complete_against(&url).await;
        assert_eq!(err.category, ProviderCategory::RateLimit);
        assert_eq!(classify(&err), ChatError::RateLimited);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_single_attempt() {
        let (url, hits) = spawn_endpoint(
            "500 Internal Server Error",
            "The server had an error while processing your request.",
        )
        .await;

        let err = complete_against(&url).await;
        assert_eq!(err.category, ProviderCategory::Other);
        assert!(matches!(classify(&err), ChatError::ProviderError(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insufficient_quota_response_is_quota() {
        let (url, hits) = spawn_endpoint(
            "429 Too Many Requests",
            r#"{"error":{"message":"You exceeded your current quota, please check your plan.","type":"insufficient_quota","param":null,"code":"insufficient_quota"}}"#,
        )
        .await;

        let err = complete_against(&url).await;
        assert_eq!(err.category, ProviderCategory::Quota);
        assert_eq!(classify(&err), ChatError::QuotaExceeded);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = complete_against(&format!("http://{addr}/v1")).await;
        assert_eq!(err.category, ProviderCategory::Connection);
        assert!(matches!(classify(&err), ChatError::ConnectionFailure(_)));
    }

    #[test]
    fn test_api_error_categories() {
        let quota = to_llm_error(api_error(
            "You exceeded your current quota",
            Some("insufficient_quota"),
            None,
        ));
        assert_eq!(quota.category, ProviderCategory::Quota);

        let auth = to_llm_error(api_error(
            "Incorrect API key provided: sk-test",
            Some("invalid_request_error"),
            Some("invalid_api_key"),
        ));
        assert_eq!(auth.category, ProviderCategory::Auth);
        assert_eq!(classify(&auth), ChatError::InvalidCredentials);

        let rate = to_llm_error(api_error(
            "Rate limit reached for gpt-3.5-turbo",
            Some("requests"),
            Some("rate_limit_exceeded"),
        ));
        assert_eq!(rate.category, ProviderCategory::RateLimit);

        let other = to_llm_error(api_error("The model is overloaded", None, None));
        assert_eq!(other.category, ProviderCategory::Other);
    }

    #[test]
    fn test_invalid_argument_is_other() {
        let err = to_llm_error(OpenAIError::InvalidArgument("bad messages".to_string()));
        assert_eq!(err.category, ProviderCategory::Other);
        assert!(err.message.contains("bad messages"));
    }

    #[test]
    fn test_category_from_text_quota_wins() {
        assert_eq!(
            category_from_text("Rate limit reached: insufficient_quota"),
            ProviderCategory::Quota
        );
        assert_eq!(
            category_from_text("Please check your plan and billing details"),
            ProviderCategory::Quota
        );
    }

    #[test]
    fn test_category_from_text_auth_and_rate_limit() {
        assert_eq!(
            category_from_text("Incorrect API key provided: sk-xxx"),
            ProviderCategory::Auth
        );
        assert_eq!(
            category_from_text("code: Some(\"invalid_api_key\")"),
            ProviderCategory::Auth
        );
        assert_eq!(
            category_from_text("Rate limit reached for requests"),
            ProviderCategory::RateLimit
        );
        assert_eq!(
            category_from_text("The server had an error"),
            ProviderCategory::Other
        );
    }

    #[test]
    fn test_to_openai_messages_keeps_order_and_roles() {
        let messages = vec![
            Message::system("persona"),
            Message::user("Hi"),
            Message::assistant("Hello"),
        ];
        let converted = OpenAiClient::to_openai_messages(&messages).unwrap();
        assert_eq!(converted.len(), 3);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
    }
}
