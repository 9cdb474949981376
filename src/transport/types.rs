// 传输层类型定义

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// 一次成功发送后远端返回的标识
///
/// 平台按 file_id 下载内容、按 message_id 删除消息，两者都需要记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    /// 频道内的消息 ID（删除时使用）
    pub message_id: i64,
    /// 文档的远端文件 ID（下载时使用）
    pub file_id: String,
}

/// 传输层错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 网络错误（可重试）
    #[error("网络错误: {0}")]
    Network(String),
    /// 超时（可重试）
    #[error("请求超时")]
    Timeout,
    /// 限流（可重试，至少等待 retry_after 秒）
    #[error("触发限流，需等待 {retry_after} 秒")]
    RateLimited { retry_after: u64 },
    /// 服务端错误（可重试）
    #[error("服务端错误: {status} {message}")]
    Server { status: u16, message: String },
    /// 请求被拒绝（参数错误、消息不存在、权限不足等，不可重试）
    #[error("请求被拒绝: {code} {message}")]
    Rejected { code: u16, message: String },
    /// 响应解析失败（不可重试）
    #[error("响应解析失败: {0}")]
    Decode(String),
    /// 下载到的数据长度与记录不一致（可重试）
    #[error("分片数据不完整: 期望 {expected} bytes, 实际 {actual} bytes")]
    Truncated { expected: u64, actual: u64 },
}

impl TransportError {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout
                | TransportError::RateLimited { .. }
                | TransportError::Server { .. }
                | TransportError::Truncated { .. }
        )
    }

    /// 限流时平台要求的最短等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => Some(Duration::from_secs(*retry_after)),
            _ => None,
        }
    }

    /// 根据 Bot API 的错误码分类
    pub fn from_api_error(code: u16, message: String, retry_after: Option<u64>) -> Self {
        match code {
            429 => TransportError::RateLimited {
                retry_after: retry_after.unwrap_or(1),
            },
            500..=599 => TransportError::Server {
                status: code,
                message,
            },
            _ => TransportError::Rejected { code, message },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::from_api_error(status.as_u16(), e.to_string(), None)
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

// =====================================================
// Bot API 响应结构
// =====================================================

/// Bot API 通用响应包装
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

impl<T> ApiResponse<T> {
    /// 转换为结果，失败时按错误码分类
    pub fn into_result(self) -> Result<T, TransportError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| TransportError::Decode("响应缺少 result 字段".to_string()));
        }

        let code = self.error_code.unwrap_or(400);
        let message = self.description.unwrap_or_default();
        let retry_after = self.parameters.and_then(|p| p.retry_after);
        Err(TransportError::from_api_error(code, message, retry_after))
    }
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    #[serde(default)]
    pub file_path: Option<String>,
}
