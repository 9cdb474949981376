// 配置管理模块

use crate::cache::{DEFAULT_CACHE_TTL_SECS, DEFAULT_MAX_ENTRY_BYTES, DEFAULT_MAX_TOTAL_BYTES};
use crate::common::retry::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use crate::common::RetryPolicy;
use crate::downloader::DEFAULT_DOWNLOAD_CONCURRENCY;
use crate::transport::client::DEFAULT_API_BASE;
use crate::uploader::{DEFAULT_CHUNK_SIZE, DEFAULT_UPLOAD_CONCURRENCY, MAX_CHUNK_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Bot token 列表环境变量（逗号分隔）
pub const ENV_BOT_TOKENS: &str = "TELEVAULT_BOT_TOKENS";

/// 频道 ID 环境变量
pub const ENV_CHANNEL_ID: &str = "TELEVAULT_CHANNEL_ID";

/// 配置来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// 从配置文件加载
    File,
    /// 配置文件不存在，使用默认值
    Default,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Telegram 配置
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// 传输配置
    #[serde(default)]
    pub transfer: TransferConfig,
    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// Telegram 配置
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token 列表（顺序即凭证索引，已上传分片依赖该顺序）
    #[serde(default)]
    pub bot_tokens: Vec<String>,
    /// 存储频道
    #[serde(default)]
    pub channel_id: String,
    /// Bot API 地址
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// token 不进入日志
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_tokens", &format!("<{} 个>", self.bot_tokens.len()))
            .field("channel_id", &self.channel_id)
            .field("api_base", &self.api_base)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_tokens: Vec::new(),
            channel_id: String::new(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TelegramConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 分片大小（字节，默认 20MB，不能超过 Bot 下载上限）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 单文件上传并发分片数
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// 单文件下载并发分片数
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    /// 每个分片的最大尝试次数（包含首次）
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_upload_concurrency() -> usize {
    DEFAULT_UPLOAD_CONCURRENCY
}

fn default_download_concurrency() -> usize {
    DEFAULT_DOWNLOAD_CONCURRENCY
}

fn default_retry_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            upload_concurrency: default_upload_concurrency(),
            download_concurrency: default_download_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// 条目有效期（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// 单条上限（字节）
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// 总预算（字节）
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_max_entry_bytes() -> u64 {
    DEFAULT_MAX_ENTRY_BYTES
}

fn default_max_total_bytes() -> u64 {
    DEFAULT_MAX_TOTAL_BYTES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            max_entry_bytes: default_max_entry_bytes(),
            max_total_bytes: default_max_total_bytes(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 文件路径
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/televault.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，文件不存在时返回默认配置
    ///
    /// 读取或解析失败时返回错误，不会改写已有文件
    pub async fn load_or_default(path: &str) -> Result<(Self, ConfigSource)> {
        match fs::metadata(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), ConfigSource::Default))
            }
            _ => {
                let config = Self::load_from_file(path)
                    .await
                    .with_context(|| format!("配置文件无效: {}", path))?;
                Ok((config, ConfigSource::File))
            }
        }
    }

    /// 用环境变量覆盖凭证与频道
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(tokens) = lookup(ENV_BOT_TOKENS) {
            self.telegram.bot_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!(
                "使用环境变量 {} 中的 {} 个 Bot 凭证",
                ENV_BOT_TOKENS,
                self.telegram.bot_tokens.len()
            );
        }

        if let Some(channel) = lookup(ENV_CHANNEL_ID) {
            let channel = channel.trim();
            if !channel.is_empty() {
                self.telegram.channel_id = channel.to_string();
            }
        }
    }

    /// 校验配置
    ///
    /// 凭证列表是否为空由凭证池在构建时检查
    pub fn validate(&self) -> Result<()> {
        let transfer = &self.transfer;

        if transfer.chunk_size == 0 {
            anyhow::bail!("分片大小必须大于 0");
        }
        if transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "分片大小 {} 超过上限 {}（Bot 下载文件大小限制）",
                transfer.chunk_size,
                MAX_CHUNK_SIZE
            );
        }
        if transfer.upload_concurrency == 0 || transfer.download_concurrency == 0 {
            anyhow::bail!("并发数必须大于 0");
        }
        if transfer.retry_attempts == 0 {
            anyhow::bail!("重试次数必须大于 0");
        }
        if self.telegram.channel_id.trim().is_empty() {
            anyhow::bail!(
                "未配置存储频道（telegram.channel_id 或环境变量 {}）",
                ENV_CHANNEL_ID
            );
        }

        Ok(())
    }

    /// 由传输配置构建重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transfer.retry_attempts,
            Duration::from_millis(self.transfer.retry_base_delay_ms),
            Duration::from_millis(self.transfer.retry_max_delay_ms),
        )
        .with_call_timeout(self.telegram.request_timeout())
    }
}
