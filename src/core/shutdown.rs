//! 优雅关闭
//!
//! HTTP 服务与后台清理任务共用一个取消信号；只记录第一个关闭原因，
//! 退出前在限定时间内对会话存储再做一次过期清理。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::memory::ConversationStore;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// HTTP 服务异常退出
    FatalError(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserInitiated => write!(f, "ctrl-c"),
            ShutdownReason::Signal => write!(f, "sigterm"),
            ShutdownReason::FatalError(msg) => write!(f, "fatal error: {}", msg),
        }
    }
}

/// 关闭信号：取消 token + 首个关闭原因
pub struct ShutdownManager {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason,
        }
    }

    /// 取消 token，交给后台清理任务
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；重复触发时保留最先的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.borrow().clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down gracefully");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("Received SIGTERM, shutting down gracefully");
                        manager.shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::warn!("Failed to install SIGTERM handler: {}", e),
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 退出清理：限时对存储做最后一次过期清理
pub struct ShutdownCoordinator {
    store: Arc<ConversationStore>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// 返回清理掉的会话数；超时返回 None
    pub async fn run(&self, reason: Option<&ShutdownReason>) -> Option<usize> {
        let reason = reason.map_or_else(|| "server stopped".to_string(), ToString::to_string);
        match tokio::time::timeout(self.timeout, self.store.sweep()).await {
            Ok(removed) => {
                tracing::info!(
                    "Final sweep ({}): removed {} expired conversations, {} remain",
                    reason,
                    removed,
                    self.store.active_count().await
                );
                Some(removed)
            }
            Err(_) => {
                tracing::warn!(
                    "Final sweep ({}) timed out after {}s",
                    reason,
                    self.timeout.as_secs()
                );
                None
            }
        }
    }
}
