// TeleVault
// 以 Telegram 频道为后端存储的分片传输引擎

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 错误类型
pub mod error;

// 公共模块（重试策略）
pub mod common;

// 传输层（Bot API 客户端、凭证池）
pub mod transport;

// 上传引擎模块
pub mod uploader;

// 下载引擎模块
pub mod downloader;

// 元数据持久化模块
pub mod persistence;

// 远端分片清理
pub mod cleanup;

// 文件内容缓存
pub mod cache;

// 存储管理器
pub mod manager;

#[cfg(test)]
mod testing;

// 导出常用类型
pub use cache::BlobCache;
pub use cleanup::{ChunkDeleter, DeletionReport};
pub use common::RetryPolicy;
pub use config::{AppConfig, ConfigSource};
pub use downloader::{ChunkStream, DownloadEngine};
pub use error::{EngineError, EngineResult};
pub use manager::{EngineSettings, VaultManager};
pub use persistence::{
    ChunkRecord, ChunkStore, FileId, FileRecordService, FolderId, MemoryMetadataStore, NewFile,
    SqliteMetadataStore,
};
pub use transport::{ChunkTransport, TelegramClient, TransportError, TransportPool};
pub use uploader::{
    ByteSource, ChunkPlan, FileSource, MemorySource, UploadEngine, UploadProgress, UploadRequest,
};
