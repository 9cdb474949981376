// 引擎错误类型
//
// 分片传输引擎对外暴露的错误分类：
// - 启动期致命错误（未配置任何凭证）
// - 元数据损坏（凭证索引越界、分片序列不连续）
// - 重试耗尽后的分片上传/下载失败
// - 取消、元数据存储和数据源错误

use crate::persistence::FileId;
use crate::transport::TransportError;
use thiserror::Error;

/// 上传失败时展示给用户的通用提示
pub const UPLOAD_FAILED_MESSAGE: &str = "上传失败，请重试";

/// 下载失败时展示给用户的通用提示
pub const DOWNLOAD_FAILED_MESSAGE: &str = "下载失败，请重试";

/// 分片传输引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 没有任何可用的 Bot 凭证，引擎无法运行
    #[error("未配置任何 Bot 凭证")]
    NoCredentialsConfigured,

    /// 分片记录引用了不存在的凭证槽位（元数据损坏或跨环境数据）
    #[error("无效的凭证索引: {index}（凭证池大小 {pool_size}）")]
    InvalidCredentialIndex { index: usize, pool_size: usize },

    /// 分片上传在重试耗尽后失败
    ///
    /// `file_id` 为 Some 时表示分片 0 已成功、文件记录已生成，
    /// 之前写入的分片元数据仍然保留，需要调用方清理
    #[error("分片 #{chunk_index} 上传失败（已尝试 {attempts} 次）: {source}")]
    ChunkUploadFailed {
        file_id: Option<FileId>,
        chunk_index: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// 分片已发送但元数据写入失败（含生成文件 ID 失败）
    ///
    /// 刚发送的远端消息已尽力删除；`file_id` 为 Some 时之前的分片记录仍然保留
    #[error("分片 #{chunk_index} 元数据写入失败: {source:#}")]
    ChunkPersistFailed {
        file_id: Option<FileId>,
        chunk_index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// 分片下载在重试耗尽后失败
    #[error("分片 #{chunk_index} 下载失败（已尝试 {attempts} 次）: {source}")]
    ChunkDownloadFailed {
        chunk_index: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// 分片元数据不满足从 0 开始连续编号的约束
    #[error("文件 {file_id} 的分片序列损坏: {reason}")]
    CorruptChunkSequence { file_id: FileId, reason: String },

    /// 传输被取消
    ///
    /// 上传在分片 0 之后被取消时 `file_id` 为已生成的文件 ID
    #[error("传输已取消")]
    Cancelled { file_id: Option<FileId> },

    /// 元数据存储错误
    #[error("元数据存储错误: {0:#}")]
    Store(#[source] anyhow::Error),

    /// 读取上传数据源失败
    #[error("分片 #{chunk_index} 读取数据源失败: {source:#}")]
    Source {
        file_id: Option<FileId>,
        chunk_index: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// 面向最终用户的通用提示，不暴露内部细节
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::ChunkDownloadFailed { .. } | EngineError::CorruptChunkSequence { .. } => {
                DOWNLOAD_FAILED_MESSAGE
            }
            _ => UPLOAD_FAILED_MESSAGE,
        }
    }

    /// 上传失败时已生成的文件 ID（用于调用方清理残留分片）
    pub fn orphaned_file_id(&self) -> Option<FileId> {
        match self {
            EngineError::ChunkUploadFailed { file_id, .. } => *file_id,
            EngineError::ChunkPersistFailed { file_id, .. } => *file_id,
            EngineError::Source { file_id, .. } => *file_id,
            EngineError::Cancelled { file_id } => *file_id,
            _ => None,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_is_generic() {
        let err = EngineError::ChunkUploadFailed {
            file_id: Some(7),
            chunk_index: 3,
            attempts: 3,
            source: TransportError::Timeout,
        };
        assert_eq!(err.user_message(), UPLOAD_FAILED_MESSAGE);
        assert_eq!(err.orphaned_file_id(), Some(7));
        assert!(err.to_string().contains("#3"));

        let err = EngineError::ChunkDownloadFailed {
            chunk_index: 1,
            attempts: 3,
            source: TransportError::Network("reset".to_string()),
        };
        assert_eq!(err.user_message(), DOWNLOAD_FAILED_MESSAGE);
        assert_eq!(err.orphaned_file_id(), None);
    }

    #[test]
    fn test_persist_failure_keeps_file_id() {
        let err = EngineError::ChunkPersistFailed {
            file_id: Some(4),
            chunk_index: 2,
            source: anyhow::anyhow!("disk full"),
        };
        assert_eq!(err.orphaned_file_id(), Some(4));
        assert_eq!(err.user_message(), UPLOAD_FAILED_MESSAGE);
        assert!(err.to_string().contains("disk full"));
    }
}
