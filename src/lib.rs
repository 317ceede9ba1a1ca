//! Helpdesk - 客服对话后端
//!
//! 模块划分：
//! - **api**: HTTP 接口（axum，`web` feature）
//! - **config**: 应用配置加载（TOML + 环境变量）与启动校验
//! - **core**: 错误分类、回复编排、优雅关闭
//! - **llm**: LLM 客户端抽象、OpenAI 兼容实现、离线模拟回复
//! - **memory**: 会话与会话存储（有界历史、过期清理）
//! - **observability**: 日志初始化
//! - **service**: 会话存储 + 回复编排的组合，供前端调用

#[cfg(feature = "web")]
pub mod api;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod service;

pub use crate::core::{ChatError, CompletionOrchestrator};
pub use crate::memory::ConversationStore;
pub use crate::service::{ChatReply, ChatService};
