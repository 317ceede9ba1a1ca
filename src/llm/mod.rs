//! LLM 层：客户端抽象、OpenAI 兼容实现与离线模拟回复

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::mock_reply;
pub use openai::{category_from_text, OpenAiClient};
pub use traits::{CompletionRequest, LlmClient, LlmError, ProviderCategory};
