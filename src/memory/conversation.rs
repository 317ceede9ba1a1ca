//! 短期记忆：单个会话
//!
//! 保留最近 N 轮对话（user/assistant 对），超出时从头部剪枝；过期判定供 resolve 与 sweep 共用。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话 ID 前缀
pub const CONVERSATION_ID_PREFIX: &str = "conv_";

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// 仅由编排器合成，从不入库
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发给模型的消息（不含时间戳）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 已入库的消息：追加后不可变
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// 单个会话：最多保留 max_pairs*2 条消息
#[derive(Clone, Debug)]
pub struct Conversation {
    id: String,
    messages: Vec<StoredMessage>,
    max_pairs: usize,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    /// 已被 clear / 过期删除；持有旧句柄的并发操作据此失败
    pub(crate) removed: bool,
}

impl Conversation {
    pub fn new(id: String, max_pairs: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            max_pairs,
            created_at: now,
            last_updated: now,
            removed: false,
        }
    }

    /// 生成不可猜测的会话 ID：固定前缀 + 128 位随机数的十六进制
    pub fn generate_id() -> String {
        format!("{}{}", CONVERSATION_ID_PREFIX, uuid::Uuid::new_v4().simple())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        let now = Utc::now();
        self.messages.push(StoredMessage {
            role,
            content: content.into(),
            timestamp: now,
        });
        self.last_updated = now;
        self.prune();
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    /// 去掉时间戳，按追加顺序返回，可直接交给编排器
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().map(StoredMessage::to_message).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 空闲时间严格大于 timeout 即视为过期；时钟回拨时不过期
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (now - self.last_updated).to_std() {
            Ok(idle) => idle > timeout,
            Err(_) => false,
        }
    }

    /// 超出 max_pairs*2 时丢弃最旧的消息，保留最近部分
    fn prune(&mut self) {
        let keep = self.max_pairs * 2;
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        let delta = chrono::Duration::from_std(by).expect("duration in range");
        self.last_updated -= delta;
        self.created_at -= delta;
    }
}
