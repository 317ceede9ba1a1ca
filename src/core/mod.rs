//! 核心层：错误分类、回复编排、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;

pub use error::ChatError;
pub use orchestrator::{annotate_user_message, classify, CompletionOrchestrator, SYSTEM_PROMPT};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
