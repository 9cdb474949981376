// 上传引擎
//
// 核心流程：
// 1. 按分片大小规划分片
// 2. 单独同步上传分片 0，成功后生成文件 ID
// 3. 其余分片按固定窗口分批并发上传，批内全部结束后才开始下一批
// 4. 每个分片成功后先写元数据，再上报进度
//
// 取消：在分片 0 之前和每批开始前检查，已发出的请求允许自然完成
//
// 分片发送成功但元数据写入失败时，尽力删除刚发送的远端消息

use crate::common::{RetryExhausted, RetryPolicy};
use crate::error::{EngineError, EngineResult};
use crate::persistence::{ChunkRecord, ChunkStore, FileId, FileRecordService, FirstChunkResult, NewFile};
use crate::transport::{RemoteMessage, TransportPool};
use crate::uploader::{ByteSource, ChunkPlan, PlannedChunk, UploadProgress};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认批大小（单文件并发分片数）
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 5;

/// 空分片的占位内容（平台拒绝空文件），记录中的 byte_size 仍为 0
pub const EMPTY_CHUNK_PLACEHOLDER: &[u8] = &[0];

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// 上传请求
pub struct UploadRequest {
    /// 目标频道
    pub channel: String,
    /// 文件信息（size 即总字节数）
    pub file: NewFile,
    /// 数据源
    pub source: Arc<dyn ByteSource>,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 进度回调
    pub on_progress: Option<ProgressCallback>,
}

impl UploadRequest {
    pub fn new(channel: impl Into<String>, file: NewFile, source: Arc<dyn ByteSource>) -> Self {
        Self {
            channel: channel.into(),
            file,
            source,
            cancel_token: CancellationToken::new(),
            on_progress: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub chunk_count: usize,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

/// 进度追踪（原子计数，分片任务并发更新）
struct ProgressTracker {
    total_chunks: usize,
    total_bytes: u64,
    started: Instant,
    uploaded_chunks: AtomicUsize,
    uploaded_bytes: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    fn new(plan: &ChunkPlan, callback: Option<ProgressCallback>) -> Self {
        Self {
            total_chunks: plan.chunk_count(),
            total_bytes: plan.total_size(),
            started: Instant::now(),
            uploaded_chunks: AtomicUsize::new(0),
            uploaded_bytes: AtomicU64::new(0),
            callback,
        }
    }

    /// 记录一个分片完成并上报
    fn chunk_completed(&self, bytes: u64) -> UploadProgress {
        let uploaded_chunks = self.uploaded_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        let uploaded_bytes = self.uploaded_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;

        let progress = UploadProgress {
            uploaded_chunks,
            total_chunks: self.total_chunks,
            uploaded_bytes,
            total_bytes: self.total_bytes,
            elapsed: self.started.elapsed(),
        };

        if let Some(callback) = &self.callback {
            callback(progress);
        }
        progress
    }
}

/// 单个文件上传过程中各分片任务共享的上下文
struct ChunkUploadContext {
    pool: Arc<TransportPool>,
    store: Arc<dyn ChunkStore>,
    retry: RetryPolicy,
    channel: String,
    file_name: String,
    source: Arc<dyn ByteSource>,
    tracker: ProgressTracker,
}

impl ChunkUploadContext {
    /// 读取并发送一个分片（带重试），每次尝试轮询取一个凭证
    async fn send_chunk(&self, chunk: &PlannedChunk) -> EngineResult<(RemoteMessage, usize)> {
        let data = self
            .source
            .read_range(chunk.range.clone())
            .await
            .map_err(|source| EngineError::Source {
                file_id: None,
                chunk_index: chunk.index,
                source,
            })?;
        let data = if data.is_empty() {
            EMPTY_CHUNK_PLACEHOLDER.to_vec()
        } else {
            data
        };
        let name = format!("{}.part{}", self.file_name, chunk.index);
        let label = format!("[分片#{}] 上传", chunk.index);

        debug!(
            "[分片#{}] 开始上传 (范围: {}..{}, 大小: {} bytes)",
            chunk.index,
            chunk.range.start,
            chunk.range.end,
            chunk.size()
        );

        self.retry
            .run(&label, |_attempt| {
                let (client, credential_index) = self.pool.next();
                let data = data.clone();
                let name = name.as_str();
                async move {
                    client
                        .send(&self.channel, data, name)
                        .await
                        .map(|message| (message, credential_index))
                }
            })
            .await
            .map_err(|RetryExhausted { attempts, last_error }| {
                error!(
                    "[分片#{}] 上传失败，已尝试 {} 次: {}",
                    chunk.index, attempts, last_error
                );
                EngineError::ChunkUploadFailed {
                    file_id: None,
                    chunk_index: chunk.index,
                    attempts,
                    source: last_error,
                }
            })
    }

    /// 写入分片记录并上报进度
    async fn persist(
        &self,
        file_id: FileId,
        chunk: &PlannedChunk,
        message: RemoteMessage,
        credential_index: usize,
    ) -> EngineResult<()> {
        let message_id = message.message_id;
        let record = ChunkRecord {
            file_id,
            chunk_index: chunk.index,
            external_message_id: message_id,
            external_file_id: message.file_id,
            credential_index,
            byte_size: chunk.size(),
        };
        if let Err(e) = self.store.create_chunk(&record).await {
            error!("[分片#{}] 写入分片记录失败: {:#}", chunk.index, e);
            self.discard_sent(chunk.index, message_id, credential_index)
                .await;
            return Err(EngineError::ChunkPersistFailed {
                file_id: Some(file_id),
                chunk_index: chunk.index,
                source: e,
            });
        }

        let progress = self.tracker.chunk_completed(chunk.size());
        info!(
            "[分片#{}] ✓ 上传成功 ({}/{} 完成, Bot#{})",
            chunk.index, progress.uploaded_chunks, progress.total_chunks, credential_index
        );
        Ok(())
    }

    /// 删除没有记录指向的远端消息，失败只记录日志
    async fn discard_sent(&self, chunk_index: usize, message_id: i64, credential_index: usize) {
        let client = match self.pool.by_index(credential_index) {
            Ok(client) => client,
            Err(e) => {
                warn!("[分片#{}] 无法清理远端消息 {}: {}", chunk_index, message_id, e);
                return;
            }
        };

        match client.delete(&self.channel, message_id).await {
            Ok(()) => info!(
                "[分片#{}] 已删除未记录的远端消息 {}",
                chunk_index, message_id
            ),
            Err(e) => warn!(
                "[分片#{}] 删除未记录的远端消息 {} 失败: {}",
                chunk_index, message_id, e
            ),
        }
    }

    /// 分片 0 之后的单个分片：发送 + 持久化
    async fn upload_chunk(&self, file_id: FileId, chunk: &PlannedChunk) -> EngineResult<()> {
        let (message, credential_index) = self.send_chunk(chunk).await.map_err(|e| match e {
            EngineError::ChunkUploadFailed {
                chunk_index,
                attempts,
                source,
                ..
            } => EngineError::ChunkUploadFailed {
                file_id: Some(file_id),
                chunk_index,
                attempts,
                source,
            },
            EngineError::Source {
                chunk_index,
                source,
                ..
            } => EngineError::Source {
                file_id: Some(file_id),
                chunk_index,
                source,
            },
            other => other,
        })?;
        self.persist(file_id, chunk, message, credential_index).await
    }
}

// =====================================================
// 上传引擎
// =====================================================

/// 上传引擎
///
/// 负责单个文件的完整上传：分片规划、分片 0 优先、分批并发、重试与进度
pub struct UploadEngine {
    /// 凭证池
    pool: Arc<TransportPool>,
    /// 分片元数据存储
    store: Arc<dyn ChunkStore>,
    /// 文件记录服务
    files: Arc<dyn FileRecordService>,
    /// 重试策略
    retry: RetryPolicy,
    /// 分片大小
    chunk_size: u64,
    /// 批大小
    concurrency: usize,
}

impl UploadEngine {
    pub fn new(
        pool: Arc<TransportPool>,
        store: Arc<dyn ChunkStore>,
        files: Arc<dyn FileRecordService>,
        retry: RetryPolicy,
        chunk_size: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            pool,
            store,
            files,
            retry,
            chunk_size,
            concurrency: concurrency.max(1),
        }
    }

    /// 执行上传
    ///
    /// 失败时已写入的分片记录保留，`EngineError::orphaned_file_id()` 给出需要清理的文件
    pub async fn upload(&self, request: UploadRequest) -> EngineResult<UploadOutcome> {
        let UploadRequest {
            channel,
            file,
            source,
            cancel_token,
            on_progress,
        } = request;

        let plan = ChunkPlan::new(file.size, self.chunk_size);
        info!(
            "开始上传: name={}, size={} bytes, 分片大小={} bytes, 分片数量={}, 并发数={}",
            file.name,
            file.size,
            plan.chunk_size(),
            plan.chunk_count(),
            self.concurrency
        );

        let ctx = Arc::new(ChunkUploadContext {
            pool: self.pool.clone(),
            store: self.store.clone(),
            retry: self.retry,
            channel,
            file_name: file.name.clone(),
            source,
            tracker: ProgressTracker::new(&plan, on_progress),
        });

        // 检查取消
        if cancel_token.is_cancelled() {
            return Err(EngineError::Cancelled { file_id: None });
        }

        // 1. 分片 0 单独上传，成功后生成文件 ID
        let (first, rest) = plan.split_first();
        let (message, credential_index) = ctx.send_chunk(first).await?;
        let first_result = FirstChunkResult {
            external_message_id: message.message_id,
            external_file_id: message.file_id.clone(),
            credential_index,
            byte_size: first.size(),
        };
        let file_id = match self.files.mint_file_id(&file, &first_result).await {
            Ok(file_id) => file_id,
            Err(e) => {
                error!("生成文件 ID 失败: {:#}", e);
                ctx.discard_sent(first.index, first_result.external_message_id, credential_index)
                    .await;
                return Err(EngineError::ChunkPersistFailed {
                    file_id: None,
                    chunk_index: first.index,
                    source: e,
                });
            }
        };
        ctx.persist(file_id, first, message, credential_index).await?;

        // 2. 其余分片按批次上传
        for (batch_no, batch) in rest.chunks(self.concurrency).enumerate() {
            if cancel_token.is_cancelled() {
                info!("上传已取消: file_id={}, 已完成批次={}", file_id, batch_no);
                return Err(EngineError::Cancelled {
                    file_id: Some(file_id),
                });
            }

            debug!(
                "[批次#{}] 开始上传 {} 个分片: #{}..=#{}",
                batch_no,
                batch.len(),
                batch[0].index,
                batch[batch.len() - 1].index
            );
            self.upload_batch(&ctx, file_id, batch).await?;
        }

        let elapsed = ctx.tracker.started.elapsed();
        info!(
            "上传完成: file_id={}, 分片数={}, 大小={} bytes, 耗时={:.2}s",
            file_id,
            plan.chunk_count(),
            plan.total_size(),
            elapsed.as_secs_f64()
        );

        Ok(UploadOutcome {
            file_id,
            chunk_count: plan.chunk_count(),
            total_bytes: plan.total_size(),
            elapsed,
        })
    }

    /// 并发上传一批分片，等待全部结束
    ///
    /// 批内任一分片失败时，其余分片仍然跑完，返回索引最小的失败
    async fn upload_batch(
        &self,
        ctx: &Arc<ChunkUploadContext>,
        file_id: FileId,
        batch: &[PlannedChunk],
    ) -> EngineResult<()> {
        let mut join_set: JoinSet<(usize, EngineResult<()>)> = JoinSet::new();

        for chunk in batch {
            let ctx = ctx.clone();
            let chunk = chunk.clone();
            join_set.spawn(async move {
                let result = ctx.upload_chunk(file_id, &chunk).await;
                (chunk.index, result)
            });
        }

        let mut first_error: Option<(usize, EngineError)> = None;
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = match joined {
                Ok(r) => r,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    error!("分片任务异常: {}", e);
                    return Err(EngineError::Cancelled {
                        file_id: Some(file_id),
                    });
                }
            };

            if let Err(e) = result {
                if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                    first_error = Some((index, e));
                }
            }
        }

        match first_error {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::ChunkDeleter;
    use crate::persistence::MemoryMetadataStore;
    use crate::testing::{memory_pool, sample_bytes, MemoryTransport};
    use crate::transport::TransportError;
    use crate::uploader::MemorySource;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const KB: usize = 1024;

    fn engine(
        pool: Arc<TransportPool>,
        store: Arc<MemoryMetadataStore>,
        chunk_size: u64,
        concurrency: usize,
    ) -> UploadEngine {
        let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
        UploadEngine::new(pool, store.clone(), store, retry, chunk_size, concurrency)
    }

    /// 指定分片写入失败，其余委托给内存存储
    struct FailingChunkStore {
        inner: Arc<MemoryMetadataStore>,
        fail_index: usize,
    }

    #[async_trait]
    impl ChunkStore for FailingChunkStore {
        async fn create_chunk(&self, record: &ChunkRecord) -> anyhow::Result<()> {
            if record.chunk_index == self.fail_index {
                anyhow::bail!("disk full");
            }
            self.inner.create_chunk(record).await
        }

        async fn list_chunks(&self, file_id: FileId) -> anyhow::Result<Vec<ChunkRecord>> {
            self.inner.list_chunks(file_id).await
        }

        async fn delete_chunks(&self, file_id: FileId) -> anyhow::Result<usize> {
            self.inner.delete_chunks(file_id).await
        }
    }

    /// 总是无法生成文件 ID
    struct LockedFileRecords;

    #[async_trait]
    impl FileRecordService for LockedFileRecords {
        async fn mint_file_id(
            &self,
            _file: &NewFile,
            _first_chunk: &FirstChunkResult,
        ) -> anyhow::Result<FileId> {
            anyhow::bail!("database is locked")
        }
    }

    /// 从指定偏移开始读取失败的数据源
    struct TruncatedSource {
        data: Vec<u8>,
        readable: u64,
    }

    #[async_trait]
    impl ByteSource for TruncatedSource {
        async fn read_range(&self, range: std::ops::Range<u64>) -> anyhow::Result<Vec<u8>> {
            if range.end > self.readable {
                anyhow::bail!("unexpected end of file");
            }
            Ok(self.data[range.start as usize..range.end as usize].to_vec())
        }
    }

    fn request(data: Vec<u8>) -> UploadRequest {
        let file = NewFile::new("movie.mkv", data.len() as u64);
        UploadRequest::new("-100123", file, Arc::new(MemorySource::new(data)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_three_chunks() {
        let (pool, transports) = memory_pool(1);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 4 * KB as u64, 5);

        let progress_log = Arc::new(Mutex::new(Vec::new()));
        let log = progress_log.clone();
        let request = request(sample_bytes(10 * KB))
            .with_progress(Arc::new(move |p: UploadProgress| log.lock().push(p)));

        let outcome = engine.upload(request).await.unwrap();
        assert_eq!(outcome.chunk_count, 3);
        assert_eq!(outcome.total_bytes, 10 * KB as u64);

        // 分片 0 最先发送
        let sent = transports[0].sent_names.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], "movie.mkv.part0");

        // 元数据逐片写入
        let chunks = store.list_chunks(outcome.file_id).await.unwrap();
        let sizes: Vec<u64> = chunks.iter().map(|c| c.byte_size).collect();
        assert_eq!(sizes, vec![4096, 4096, 2048]);
        assert_eq!(store.file(outcome.file_id).unwrap().name, "movie.mkv");

        // 每个分片上报一次进度
        let log = progress_log.lock();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].uploaded_chunks, 1);
        assert_eq!(log[0].uploaded_bytes, 4096);
        assert!(log[2].is_complete());
        assert_eq!(log[2].uploaded_bytes, 10 * KB as u64);
        assert_eq!(log[2].percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_upload_empty_file() {
        let (pool, transports) = memory_pool(2);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 4096, 5);

        let outcome = engine.upload(request(Vec::new())).await.unwrap();
        assert_eq!(outcome.chunk_count, 1);

        let chunks = store.list_chunks(outcome.file_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].byte_size, 0);

        // 远端保存的是非空占位内容
        let transport = &transports[chunks[0].credential_index];
        assert_eq!(
            transport.blob(&chunks[0].external_file_id).unwrap(),
            EMPTY_CHUNK_PLACEHOLDER
        );
    }

    #[tokio::test]
    async fn test_round_robin_credentials_recorded() {
        let (pool, transports) = memory_pool(3);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 100, 4);

        let outcome = engine.upload(request(sample_bytes(900))).await.unwrap();
        let chunks = store.list_chunks(outcome.file_id).await.unwrap();
        assert_eq!(chunks.len(), 9);

        // 每个记录的凭证确实持有该分片
        for chunk in &chunks {
            assert!(transports[chunk.credential_index].contains_message(chunk.external_message_id));
        }
        // 负载分散到所有凭证
        for transport in &transports {
            assert_eq!(transport.blob_count(), 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_succeed() {
        let (pool, transports) = memory_pool(1);
        transports[0].fail_next_sends([TransportError::Timeout, TransportError::Timeout]);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 4096, 5);

        let outcome = engine.upload(request(sample_bytes(100))).await.unwrap();
        assert_eq!(transports[0].sends.load(Ordering::SeqCst), 3);
        assert_eq!(store.chunk_count(outcome.file_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_chunk_failure_mints_nothing() {
        let (pool, transports) = memory_pool(1);
        transports[0].always_fail_send("part0");
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 4096, 5);

        let err = engine.upload(request(sample_bytes(10_000))).await.unwrap_err();
        match err {
            EngineError::ChunkUploadFailed {
                file_id,
                chunk_index,
                attempts,
                ..
            } => {
                assert_eq!(file_id, None);
                assert_eq!(chunk_index, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(store.file(1).is_none());
        assert_eq!(transports[0].blob_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_failure_leaves_partial_records() {
        let (pool, transports) = memory_pool(1);
        transports[0].always_fail_send("part3");
        let store = Arc::new(MemoryMetadataStore::new());
        // 6 个分片，批次: [0] [1,2] [3,4] [5]
        let engine = engine(pool, store.clone(), 10, 2);

        let err = engine.upload(request(sample_bytes(60))).await.unwrap_err();
        let file_id = err.orphaned_file_id().expect("file minted");
        assert!(matches!(
            err,
            EngineError::ChunkUploadFailed { chunk_index: 3, attempts: 3, .. }
        ));

        // 同批的分片 4 允许完成，分片 5 不再开始
        let indices: Vec<usize> = store
            .list_chunks(file_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 4]);
        assert!(!transports[0]
            .sent_names
            .lock()
            .iter()
            .any(|n| n.ends_with("part5")));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (pool, transports) = memory_pool(1);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store, 4096, 5);

        let token = CancellationToken::new();
        token.cancel();
        let err = engine
            .upload(request(sample_bytes(100)).with_cancel_token(token))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { file_id: None }));
        assert_eq!(transports[0].sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_checked_at_batch_boundary() {
        let (pool, _transports) = memory_pool(1);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 10, 2);

        // 分片 0 完成后取消
        let token = CancellationToken::new();
        let cancel = token.clone();
        let request = request(sample_bytes(50))
            .with_cancel_token(token)
            .with_progress(Arc::new(move |p: UploadProgress| {
                if p.uploaded_chunks == 1 {
                    cancel.cancel();
                }
            }));

        let err = engine.upload(request).await.unwrap_err();
        let file_id = err.orphaned_file_id().expect("file minted");
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert_eq!(store.chunk_count(file_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_bounds_concurrency() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_send_delay(Duration::from_millis(10));
        let pool = Arc::new(
            TransportPool::new(vec![transport.clone() as Arc<dyn crate::transport::ChunkTransport>])
                .unwrap(),
        );
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 10, 5);

        let outcome = engine.upload(request(sample_bytes(130))).await.unwrap();
        assert_eq!(outcome.chunk_count, 13);
        assert_eq!(store.chunk_count(outcome.file_id), 13);
        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_zero_finishes_before_other_sends() {
        let (pool, transports) = memory_pool(1);
        transports[0].delay_send("part0", Duration::from_millis(500));
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 10, 5);

        let outcome = engine.upload(request(sample_bytes(40))).await.unwrap();
        assert_eq!(store.chunk_count(outcome.file_id), 4);

        // 分片 0 结束之前没有其他分片进入 send
        let events = transports[0].send_events.lock().clone();
        assert_eq!(events.len(), 8);
        assert_eq!(events[0], "+movie.mkv.part0");
        assert_eq!(events[1], "-movie.mkv.part0");
    }

    #[tokio::test]
    async fn test_persist_failure_reports_file_and_discards_message() {
        let (pool, transports) = memory_pool(1);
        let memory = Arc::new(MemoryMetadataStore::new());
        let failing = Arc::new(FailingChunkStore {
            inner: memory.clone(),
            fail_index: 2,
        });
        let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
        let engine = UploadEngine::new(pool.clone(), failing, memory.clone(), retry, 10, 5);

        // 批次: [0] [1,2,3]
        let err = engine.upload(request(sample_bytes(40))).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::ChunkPersistFailed { chunk_index: 2, .. }
        ));
        let file_id = err.orphaned_file_id().expect("file minted");

        // 分片 2 的远端消息已删除，其余分片都有记录
        let indices: Vec<usize> = memory
            .list_chunks(file_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 3]);
        assert_eq!(transports[0].blob_count(), 3);

        // 调用方按文件 ID 清理后不留残余
        let deleter = ChunkDeleter::new(pool, memory.clone());
        let report = deleter.delete_file_blobs("-100123", file_id).await;
        assert!(report.is_clean());
        assert_eq!(transports[0].blob_count(), 0);
        assert_eq!(memory.chunk_count(file_id), 0);
    }

    #[tokio::test]
    async fn test_mint_failure_discards_first_chunk() {
        let (pool, transports) = memory_pool(1);
        let store = Arc::new(MemoryMetadataStore::new());
        let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
        let engine = UploadEngine::new(
            pool,
            store.clone(),
            Arc::new(LockedFileRecords),
            retry,
            4096,
            5,
        );

        let err = engine.upload(request(sample_bytes(10_000))).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::ChunkPersistFailed {
                file_id: None,
                chunk_index: 0,
                ..
            }
        ));
        assert_eq!(err.orphaned_file_id(), None);
        assert!(err.to_string().contains("database is locked"));

        // 只发送了分片 0，且已被删除
        assert_eq!(transports[0].sends.load(Ordering::SeqCst), 1);
        assert_eq!(transports[0].deletes.load(Ordering::SeqCst), 1);
        assert_eq!(transports[0].blob_count(), 0);
    }

    #[tokio::test]
    async fn test_source_failure_after_mint_reports_file() {
        let (pool, _transports) = memory_pool(1);
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = engine(pool, store.clone(), 10, 5);

        let data = sample_bytes(30);
        let file = NewFile::new("movie.mkv", data.len() as u64);
        let source = Arc::new(TruncatedSource { data, readable: 20 });
        let err = engine
            .upload(UploadRequest::new("-100123", file, source))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Source { chunk_index: 2, .. }));
        let file_id = err.orphaned_file_id().expect("file minted");
        assert_eq!(store.chunk_count(file_id), 2);
    }
}
