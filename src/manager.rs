// 存储管理器
//
// 对上层（CRUD/API）暴露的统一入口：
// - upload_file: 分片上传，返回文件 ID
// - download_file / download_file_stream: 缓冲或流式下载
// - delete_file_blobs / delete_files_blobs: 尽力清理远端分片
//
// 所有协作者通过构造参数注入，没有全局状态

use crate::cache::BlobCache;
use crate::cleanup::{ChunkDeleter, DeletionReport};
use crate::common::RetryPolicy;
use crate::config::AppConfig;
use crate::downloader::{ChunkStream, DownloadEngine, DEFAULT_DOWNLOAD_CONCURRENCY};
use crate::error::{EngineError, EngineResult};
use crate::persistence::{
    ChunkRecord, ChunkStore, FileId, FileRecordService, NewFile, SqliteMetadataStore,
};
use crate::transport::TransportPool;
use crate::uploader::{
    ByteSource, ProgressCallback, UploadEngine, UploadRequest, DEFAULT_CHUNK_SIZE,
    DEFAULT_UPLOAD_CONCURRENCY,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 引擎参数
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub chunk_size: u64,
    pub upload_concurrency: usize,
    pub download_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size,
            upload_concurrency: config.transfer.upload_concurrency,
            download_concurrency: config.transfer.download_concurrency,
            retry: config.retry_policy(),
        }
    }
}

/// 存储管理器
///
/// 克隆开销很小，各引擎在克隆之间共享
#[derive(Clone)]
pub struct VaultManager {
    pool: Arc<TransportPool>,
    store: Arc<dyn ChunkStore>,
    uploader: Arc<UploadEngine>,
    downloader: DownloadEngine,
    deleter: Arc<ChunkDeleter>,
    cache: Option<Arc<BlobCache>>,
    /// 当前存储对应的频道
    channel: String,
}

impl std::fmt::Debug for VaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultManager")
            .field("channel", &self.channel)
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .finish()
    }
}

impl VaultManager {
    pub fn new(
        pool: Arc<TransportPool>,
        store: Arc<dyn ChunkStore>,
        files: Arc<dyn FileRecordService>,
        channel: impl Into<String>,
        settings: EngineSettings,
    ) -> Self {
        let uploader = UploadEngine::new(
            pool.clone(),
            store.clone(),
            files,
            settings.retry,
            settings.chunk_size,
            settings.upload_concurrency,
        );
        let downloader =
            DownloadEngine::new(pool.clone(), settings.retry, settings.download_concurrency);
        let deleter = ChunkDeleter::new(pool.clone(), store.clone());

        Self {
            pool,
            store,
            uploader: Arc::new(uploader),
            downloader,
            deleter: Arc::new(deleter),
            cache: None,
            channel: channel.into(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<BlobCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 按配置构建：校验配置、打开 SQLite、创建凭证池
    ///
    /// 返回的存储实例供上层读取文件记录
    pub fn from_config(config: &AppConfig) -> Result<(Self, Arc<SqliteMetadataStore>)> {
        config.validate().context("配置校验失败")?;

        let store = Arc::new(SqliteMetadataStore::new(&config.database.path)?);
        let pool = TransportPool::from_tokens(
            &config.telegram.api_base,
            &config.telegram.bot_tokens,
            config.telegram.request_timeout(),
        )?;

        let mut manager = Self::new(
            Arc::new(pool),
            store.clone(),
            store.clone(),
            config.telegram.channel_id.clone(),
            EngineSettings::from_config(config),
        );
        if config.cache.enabled {
            manager = manager.with_cache(Arc::new(BlobCache::from_config(&config.cache)));
        }

        info!(
            "存储管理器初始化完成: 频道={}, 凭证数={}, 缓存={}",
            manager.channel,
            manager.pool.len(),
            config.cache.enabled
        );
        Ok((manager, store))
    }

    /// 切换到另一个存储频道（共享引擎和缓存）
    pub fn for_channel(&self, channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..self.clone()
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn pool(&self) -> &Arc<TransportPool> {
        &self.pool
    }

    /// 上传文件
    ///
    /// 失败时已上传的分片保留，可通过 `EngineError::orphaned_file_id()` 找到并调用
    /// `delete_file_blobs` 清理
    pub async fn upload_file(
        &self,
        source: Arc<dyn ByteSource>,
        file: NewFile,
        on_progress: Option<ProgressCallback>,
        cancel_token: CancellationToken,
    ) -> EngineResult<FileId> {
        let mut request =
            UploadRequest::new(self.channel.clone(), file, source).with_cancel_token(cancel_token);
        if let Some(callback) = on_progress {
            request = request.with_progress(callback);
        }

        let outcome = self.uploader.upload(request).await?;
        Ok(outcome.file_id)
    }

    /// 文件的分片记录（按 chunk_index 升序）
    pub async fn list_chunks(&self, file_id: FileId) -> EngineResult<Vec<ChunkRecord>> {
        self.store
            .list_chunks(file_id)
            .await
            .map_err(EngineError::Store)
    }

    /// 缓冲下载完整文件，优先读缓存
    pub async fn download_file(&self, file_id: FileId) -> EngineResult<Vec<u8>> {
        if let Some(data) = self.cache.as_ref().and_then(|c| c.get(file_id)) {
            debug!("缓存命中: file_id={}, 大小={} bytes", file_id, data.len());
            return Ok(data.as_ref().clone());
        }

        let chunks = self.list_chunks(file_id).await?;
        let data = self.downloader.download_all(file_id, chunks).await?;

        if let Some(cache) = &self.cache {
            if cache.accepts(data.len() as u64) {
                cache.set(file_id, data.clone());
            }
        }
        Ok(data)
    }

    /// 流式下载（不经过缓存）
    pub async fn download_file_stream(&self, file_id: FileId) -> EngineResult<ChunkStream> {
        let chunks = self.list_chunks(file_id).await?;
        self.downloader.stream(file_id, chunks)
    }

    /// 清理单个文件的远端分片和分片记录，从不失败
    pub async fn delete_file_blobs(&self, file_id: FileId) -> DeletionReport {
        if let Some(cache) = &self.cache {
            cache.remove(file_id);
        }

        let report = self.deleter.delete_file_blobs(&self.channel, file_id).await;
        if !report.is_clean() {
            warn!(
                "文件 {} 有 {} 个远端分片未能删除，已忽略",
                file_id, report.failed
            );
        }
        report
    }

    /// 批量清理（文件夹/存储级联删除）
    pub async fn delete_files_blobs(&self, file_ids: &[FileId]) -> Vec<DeletionReport> {
        if let Some(cache) = &self.cache {
            for file_id in file_ids {
                cache.remove(*file_id);
            }
        }
        self.deleter.delete_files_blobs(&self.channel, file_ids).await
    }
}
