//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HELPDESK__*` 覆盖（双下划线表示嵌套，如 `HELPDESK__LLM__OFFLINE_MODE=true`）。
//! API Key 未在配置中给出时回退到 `OPENAI_API_KEY`。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ChatError;

/// 模型接受的 temperature 范围
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub llm: LlmSection,
    pub conversation: ConversationSection,
    pub logging: LoggingSection,
}

/// [app] 段：服务名称与版本（health 接口返回）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub version: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Customer Service Chatbot API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// [server] 段：监听地址与单次请求的回复超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// 等待模型回复的上限（秒）
    pub request_timeout_secs: u64,
    /// 关闭时清理任务的等待上限（秒）
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 60,
            shutdown_timeout_secs: 5,
        }
    }
}

/// [llm] 段：模型、采样参数与离线模式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 为 true 时从不调用远端，使用内置模拟回复
    pub offline_mode: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
            offline_mode: false,
        }
    }
}

impl LlmSection {
    /// 配置中的 Key，缺省时读 OPENAI_API_KEY；空字符串视为未配置
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// [conversation] 段：历史轮数、过期时间、后台清理间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSection {
    /// 保留的 user/assistant 轮数，实际最多 max_history_pairs*2 条消息
    pub max_history_pairs: usize,
    pub timeout_minutes: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            max_history_pairs: 10,
            timeout_minutes: 30,
            sweep_interval_secs: 300,
        }
    }
}

/// [logging] 段：默认日志级别（RUST_LOG 可覆盖），可选追加写入的日志文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// 启动时校验：超出模型可接受范围的参数直接拒绝，而不是逐请求失败
    pub fn validate(&self) -> Result<(), ChatError> {
        if !TEMPERATURE_RANGE.contains(&self.llm.temperature) {
            return Err(ChatError::Config(format!(
                "llm.temperature must be within {:?}, got {}",
                TEMPERATURE_RANGE, self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(ChatError::Config("llm.max_tokens must be > 0".to_string()));
        }
        if self.conversation.timeout_minutes == 0 {
            return Err(ChatError::Config(
                "conversation.timeout_minutes must be > 0".to_string(),
            ));
        }
        if self.conversation.sweep_interval_secs == 0 {
            return Err(ChatError::Config(
                "conversation.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ChatError::Config(
                "server.request_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 HELPDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HELPDESK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HELPDESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
