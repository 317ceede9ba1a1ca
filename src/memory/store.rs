//! 会话存储
//!
//! 所有会话的唯一持有者：签发 ID、限制历史长度、清理过期会话。
//!
//! 外层 map 只在查找 / 插入 / 移除时加锁，单个会话的读写在各自的 Mutex 下进行，
//! 因此不同会话之间互不阻塞。删除（clear / 过期 / sweep）先在会话锁内标记 `removed`
//! 再从 map 摘除，持有旧句柄的并发 append 会看到标记并返回 NotFound。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::conversation::{Conversation, Message, Role, StoredMessage};
use crate::config::ConversationSection;
use crate::core::ChatError;

type ConversationHandle = Arc<Mutex<Conversation>>;

/// 会话只读快照（历史查询接口使用）
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

/// 会话存储：conversation_id -> Conversation
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, ConversationHandle>>,
    /// 保留的 user/assistant 轮数
    max_history_pairs: usize,
    /// 空闲超过该时长即过期
    timeout: Duration,
}

impl ConversationStore {
    pub fn new(max_history_pairs: usize, timeout_minutes: u64) -> Self {
        Self::with_timeout(max_history_pairs, Duration::from_secs(timeout_minutes * 60))
    }

    pub fn with_timeout(max_history_pairs: usize, timeout: Duration) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_history_pairs,
            timeout,
        }
    }

    pub fn from_config(cfg: &ConversationSection) -> Self {
        Self::new(cfg.max_history_pairs, cfg.timeout_minutes)
    }

    async fn handle(&self, id: &str) -> Option<ConversationHandle> {
        self.conversations.read().await.get(id).cloned()
    }

    /// 从 map 摘除；仅当 map 中仍是同一个会话时才移除
    async fn unlink(&self, id: &str, handle: &ConversationHandle) {
        let mut conversations = self.conversations.write().await;
        if conversations
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            conversations.remove(id);
        }
    }

    async fn create(&self) -> String {
        loop {
            let id = Conversation::generate_id();
            let mut conversations = self.conversations.write().await;
            if conversations.contains_key(&id) {
                continue;
            }
            let conv = Conversation::new(id.clone(), self.max_history_pairs);
            conversations.insert(id.clone(), Arc::new(Mutex::new(conv)));
            tracing::debug!(conversation_id = %id, "Conversation created");
            return id;
        }
    }

    /// 获取或创建会话
    ///
    /// 传入的 id 存活时原样返回；不存在或已过期时删除旧记录并以新 ID 创建，
    /// 调用方传入的 id 永远不会被复用为另一个会话的 key。
    pub async fn resolve(&self, id: Option<&str>) -> String {
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if let Some(handle) = self.handle(id).await {
                let mut conv = handle.lock().await;
                if !conv.removed {
                    if !conv.is_expired(Utc::now(), self.timeout) {
                        return id.to_string();
                    }
                    conv.removed = true;
                    drop(conv);
                    self.unlink(id, &handle).await;
                    tracing::info!(conversation_id = %id, "Conversation expired, starting a new one");
                }
            }
        }
        self.create().await
    }

    /// 在会话锁内执行 f；会话不存在、已删除或已过期时返回 NotFound（过期的顺带删除）
    async fn with_live<F, R>(&self, id: &str, f: F) -> Result<R, ChatError>
    where
        F: FnOnce(&mut Conversation) -> R,
    {
        let handle = self
            .handle(id)
            .await
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?;
        let mut conv = handle.lock().await;
        if conv.removed {
            return Err(ChatError::NotFound(id.to_string()));
        }
        if conv.is_expired(Utc::now(), self.timeout) {
            conv.removed = true;
            drop(conv);
            self.unlink(id, &handle).await;
            return Err(ChatError::NotFound(id.to_string()));
        }
        Ok(f(&mut *conv))
    }

    fn check_content(role: Role, content: &str) -> Result<(), ChatError> {
        if role == Role::System {
            return Err(ChatError::Validation(
                "system messages are never stored".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(ChatError::Validation("message content is empty".to_string()));
        }
        Ok(())
    }

    /// 追加一条消息；未知 ID 返回 NotFound，不会自动创建
    pub async fn append(&self, id: &str, role: Role, content: &str) -> Result<(), ChatError> {
        Self::check_content(role, content)?;
        self.with_live(id, |conv| conv.push(role, content)).await
    }

    /// 在同一把锁内追加用户消息与回复，返回追加后的消息数
    pub async fn append_exchange(
        &self,
        id: &str,
        user: &str,
        assistant: &str,
    ) -> Result<usize, ChatError> {
        Self::check_content(Role::User, user)?;
        Self::check_content(Role::Assistant, assistant)?;
        self.with_live(id, |conv| {
            conv.push(Role::User, user);
            conv.push(Role::Assistant, assistant);
            conv.len()
        })
        .await
    }

    /// 按追加顺序返回历史（不含时间戳）；未知 ID 返回空
    pub async fn history(&self, id: &str) -> Vec<Message> {
        self.read_live(id, Conversation::history)
            .await
            .unwrap_or_default()
    }

    pub async fn count(&self, id: &str) -> usize {
        self.read_live(id, Conversation::len).await.unwrap_or(0)
    }

    pub async fn snapshot(&self, id: &str) -> Option<ConversationSnapshot> {
        self.read_live(id, |conv| ConversationSnapshot {
            conversation_id: conv.id().to_string(),
            messages: conv.messages().to_vec(),
            created_at: conv.created_at(),
            last_updated: conv.last_updated(),
            message_count: conv.len(),
        })
        .await
    }

    /// 只读访问；已删除或已过期的会话不可见
    async fn read_live<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Conversation) -> R,
    {
        let handle = self.handle(id).await?;
        let conv = handle.lock().await;
        if conv.removed || conv.is_expired(Utc::now(), self.timeout) {
            return None;
        }
        Some(f(&*conv))
    }

    /// 删除会话，返回删除前是否存在
    pub async fn clear(&self, id: &str) -> bool {
        let Some(handle) = self.handle(id).await else {
            return false;
        };
        let mut conv = handle.lock().await;
        if conv.removed {
            return false;
        }
        conv.removed = true;
        drop(conv);
        self.unlink(id, &handle).await;
        true
    }

    /// 清理过期会话，返回删除数量
    ///
    /// 正被其他操作持锁的会话视为活跃，本轮跳过。
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let timeout = self.timeout;
        let mut removed = 0;
        let mut conversations = self.conversations.write().await;
        conversations.retain(|_, handle| match handle.try_lock() {
            Ok(mut conv) => {
                if conv.removed {
                    return false;
                }
                if conv.is_expired(now, timeout) {
                    conv.removed = true;
                    removed += 1;
                    return false;
                }
                true
            }
            Err(_) => true,
        });
        removed
    }

    /// 当前存储的会话数
    pub async fn active_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, by: Duration) {
        if let Some(handle) = self.handle(id).await {
            handle.lock().await.backdate(by);
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(10, 30)
    }
}

/// 后台定期清理过期会话，cancel 触发后退出
pub fn spawn_sweeper(
    store: Arc<ConversationStore>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = store.sweep().await;
                    if removed > 0 {
                        tracing::info!("Swept {} expired conversations", removed);
                    }
                }
            }
        }
        tracing::debug!("Conversation sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_append_then_history_in_order() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        store.append(&id, Role::User, "Hi").await.unwrap();
        store.append(&id, Role::Assistant, "Hello").await.unwrap();

        assert_eq!(store.count(&id).await, 2);
        assert_eq!(
            store.history(&id).await,
            vec![Message::user("Hi"), Message::assistant("Hello")]
        );
    }

    #[tokio::test]
    async fn test_resolve_same_id_is_stable() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        assert_eq!(store.resolve(Some(&id)).await, id);
        assert_eq!(store.resolve(Some(&id)).await, id);
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_none_or_empty_creates_new() {
        let store = ConversationStore::new(10, 30);
        let a = store.resolve(None).await;
        let b = store.resolve(Some("")).await;
        assert_ne!(a, b);
        assert_eq!(store.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_not_reused() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(Some("conv_made_up_by_client")).await;
        assert_ne!(id, "conv_made_up_by_client");
        assert_eq!(store.count("conv_made_up_by_client").await, 0);
    }

    #[tokio::test]
    async fn test_resolve_expired_creates_new_and_drops_old() {
        let store = ConversationStore::new(10, 30);
        let old = store.resolve(None).await;
        store.append(&old, Role::User, "Hi").await.unwrap();
        store.backdate(&old, HOUR).await;

        let new = store.resolve(Some(&old)).await;
        assert_ne!(new, old);
        assert_eq!(store.count(&old).await, 0);
        assert!(store.history(&old).await.is_empty());
        assert_eq!(store.count(&new).await, 0);
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_trim_keeps_most_recent() {
        let store = ConversationStore::new(2, 30);
        let id = store.resolve(None).await;
        for i in 0..9 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append(&id, role, &format!("m{i}")).await.unwrap();
            assert!(store.count(&id).await <= 4);
        }
        let contents: Vec<_> = store
            .history(&id)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m5", "m6", "m7", "m8"]);
    }

    #[tokio::test]
    async fn test_append_unknown_id_is_not_found() {
        let store = ConversationStore::new(10, 30);
        let err = store.append("conv_missing", Role::User, "Hi").await.unwrap_err();
        assert_eq!(err, ChatError::NotFound("conv_missing".to_string()));
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_append_rejects_system_and_empty() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        assert!(matches!(
            store.append(&id, Role::System, "rules").await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            store.append(&id, Role::User, "   ").await,
            Err(ChatError::Validation(_))
        ));
        assert_eq!(store.count(&id).await, 0);
    }

    #[tokio::test]
    async fn test_append_to_expired_does_not_resurrect() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        store.append(&id, Role::User, "old").await.unwrap();
        store.backdate(&id, HOUR).await;

        let err = store.append(&id, Role::User, "new").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_clear_true_exactly_once() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        assert!(store.clear(&id).await);
        assert!(!store.clear(&id).await);
        assert!(!store.clear("conv_unknown").await);
        assert_eq!(store.count(&id).await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = ConversationStore::new(10, 30);
        let stale = store.resolve(None).await;
        let fresh = store.resolve(None).await;
        store.append(&stale, Role::User, "old").await.unwrap();
        store.append(&fresh, Role::User, "new").await.unwrap();
        store.backdate(&stale, Duration::from_secs(31 * 60)).await;
        store.backdate(&fresh, Duration::from_secs(29 * 60)).await;

        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.count(&stale).await, 0);
        assert!(store.history(&stale).await.is_empty());
        assert_eq!(store.count(&fresh).await, 1);
        assert_eq!(store.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_busy_conversation() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        store.backdate(&id, HOUR).await;

        let handle = store.handle(&id).await.unwrap();
        let guard = handle.lock().await;
        assert_eq!(store.sweep().await, 0);
        drop(guard);
        assert_eq!(store.sweep().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(ConversationStore::new(100, 30));
        let id = store.resolve(None).await;

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .append_exchange(&id, &format!("q{i}"), &format!("a{i}"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        let history = store.history(&id).await;
        assert_eq!(history.len(), 80);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_respect_bound() {
        let store = Arc::new(ConversationStore::new(3, 30));
        let id = store.resolve(None).await;

        let tasks: Vec<_> = (0..30)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move {
                    store.append(&id, Role::User, &format!("m{i}")).await.unwrap();
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.count(&id).await, 6);
    }

    #[tokio::test]
    async fn test_snapshot_of_live_conversation() {
        let store = ConversationStore::new(10, 30);
        let id = store.resolve(None).await;
        store.append_exchange(&id, "Hi", "Hello").await.unwrap();

        let snap = store.snapshot(&id).await.unwrap();
        assert_eq!(snap.conversation_id, id);
        assert_eq!(snap.message_count, 2);
        assert!(snap.last_updated >= snap.created_at);
        assert!(store.snapshot("conv_unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_task_removes_idle_conversations() {
        let store = Arc::new(ConversationStore::with_timeout(10, Duration::from_millis(20)));
        store.resolve(None).await;
        let cancel = CancellationToken::new();
        let task = spawn_sweeper(Arc::clone(&store), Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.active_count().await, 0);

        cancel.cancel();
        task.await.unwrap();
    }
}
