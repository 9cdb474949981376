// 重试策略
//
// 上传和下载共用同一套策略：
// - 最多尝试 max_attempts 次（包含首次）
// - 指数退避：base_delay * 2^attempt，上限 max_delay
// - 限流时至少等待平台要求的 retry_after
// - 每次调用带独立超时，超时与其他失败同等对待

use crate::transport::TransportError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 默认初始退避延迟（毫秒）
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// 默认最大退避延迟（毫秒）
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// 默认单次调用超时（秒）
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;

/// 重试耗尽
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    /// 实际尝试次数
    pub attempts: u32,
    /// 最后一次失败的错误
    pub last_error: TransportError,
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次）
    pub max_attempts: u32,
    /// 初始退避延迟
    pub base_delay: Duration,
    /// 最大退避延迟
    pub max_delay: Duration,
    /// 单次调用超时
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// 计算第 attempt 次失败（从 0 开始）之后的退避延迟
    ///
    /// # 延迟序列（base=500ms, max=10s）
    /// - attempt=0: 500ms
    /// - attempt=1: 1s
    /// - attempt=2: 2s
    /// - attempt=5: 10s（封顶）
    pub fn backoff_delay(&self, attempt: u32, error: &TransportError) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        match error.retry_after() {
            Some(wait) => delay.max(wait),
            None => delay,
        }
    }

    /// 按策略执行操作
    ///
    /// `op` 接收当前尝试序号（从 0 开始）。不可重试的错误立即返回
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let result = match self.call_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, op(attempt)).await {
                    Ok(r) => r,
                    Err(_) => Err(TransportError::Timeout),
                },
                None => op(attempt).await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let attempts = attempt + 1;
            if !error.is_retriable() || attempts >= max_attempts {
                return Err(RetryExhausted {
                    attempts,
                    last_error: error,
                });
            }

            let delay = self.backoff_delay(attempt, &error);
            warn!(
                "{} 失败，等待 {}ms 后重试 ({}/{}): {}",
                label,
                delay.as_millis(),
                attempts,
                max_attempts,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
