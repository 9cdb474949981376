// 下载引擎
//
// 核心流程：
// 1. 校验分片序列（从 0 开始连续，不允许空/缺口/重复），失败时不发起任何网络请求
// 2. 按固定窗口分批下载，每个分片使用上传时的凭证回查客户端
// 3. 批内按位置而非完成顺序收集结果，最终严格按 chunk_index 拼接
//
// 任一分片重试耗尽后整个下载失败，不返回部分数据

use crate::common::{RetryExhausted, RetryPolicy};
use crate::downloader::ChunkStream;
use crate::error::{EngineError, EngineResult};
use crate::persistence::{ChunkRecord, FileId};
use crate::transport::{ChunkTransport, TransportError, TransportPool};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// 默认批大小（单文件并发分片数）
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;

/// 校验分片序列
///
/// 输入需已按 chunk_index 升序排列
pub fn validate_sequence(file_id: FileId, chunks: &[ChunkRecord]) -> EngineResult<()> {
    if chunks.is_empty() {
        return Err(EngineError::CorruptChunkSequence {
            file_id,
            reason: "没有任何分片记录".to_string(),
        });
    }

    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index == position {
            continue;
        }
        let reason = if position > 0 && chunk.chunk_index == chunks[position - 1].chunk_index {
            format!("分片 #{} 重复", chunk.chunk_index)
        } else {
            format!("缺少分片 #{}（实际为 #{}）", position, chunk.chunk_index)
        };
        return Err(EngineError::CorruptChunkSequence { file_id, reason });
    }

    Ok(())
}

/// 下载单个分片（带重试），并校验长度
async fn fetch_chunk(
    client: Arc<dyn ChunkTransport>,
    retry: RetryPolicy,
    chunk: ChunkRecord,
) -> EngineResult<Vec<u8>> {
    // 空分片在远端只有占位内容
    if chunk.byte_size == 0 {
        return Ok(Vec::new());
    }

    let label = format!("[分片#{}] 下载", chunk.chunk_index);

    retry
        .run(&label, |_attempt| {
            let client = client.clone();
            let remote_id = chunk.external_file_id.clone();
            let expected = chunk.byte_size;
            async move {
                let data = client.fetch(&remote_id).await?;
                let actual = data.len() as u64;
                if actual != expected {
                    return Err(TransportError::Truncated { expected, actual });
                }
                Ok(data)
            }
        })
        .await
        .map_err(|RetryExhausted { attempts, last_error }| {
            error!(
                "[分片#{}] 下载失败，已尝试 {} 次: {}",
                chunk.chunk_index, attempts, last_error
            );
            EngineError::ChunkDownloadFailed {
                chunk_index: chunk.chunk_index,
                attempts,
                source: last_error,
            }
        })
}

/// 下载引擎
///
/// 持有凭证池和重试策略，可廉价克隆（流式下载持有一份克隆）
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    pool: Arc<TransportPool>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl DownloadEngine {
    pub fn new(pool: Arc<TransportPool>, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            pool,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 排序并校验分片序列，同时检查所有凭证索引
    ///
    /// 元数据问题在发起任何网络请求之前暴露
    fn prepare(&self, file_id: FileId, mut chunks: Vec<ChunkRecord>) -> EngineResult<Vec<ChunkRecord>> {
        chunks.sort_by_key(|c| c.chunk_index);
        validate_sequence(file_id, &chunks)?;

        for chunk in &chunks {
            self.pool.by_index(chunk.credential_index)?;
        }
        Ok(chunks)
    }

    /// 缓冲下载：返回完整文件内容
    pub async fn download_all(&self, file_id: FileId, chunks: Vec<ChunkRecord>) -> EngineResult<Vec<u8>> {
        let chunks = self.prepare(file_id, chunks)?;
        let total_size: u64 = chunks.iter().map(|c| c.byte_size).sum();
        let started = Instant::now();

        info!(
            "开始下载: file_id={}, 分片数={}, 大小={} bytes, 并发数={}",
            file_id,
            chunks.len(),
            total_size,
            self.concurrency
        );

        let mut output = Vec::with_capacity(total_size as usize);
        for (batch_no, batch) in chunks.chunks(self.concurrency).enumerate() {
            debug!("[批次#{}] 下载 {} 个分片", batch_no, batch.len());
            for data in self.fetch_batch(batch).await? {
                output.extend_from_slice(&data);
            }
        }

        info!(
            "下载完成: file_id={}, 大小={} bytes, 耗时={:.2}s",
            file_id,
            output.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(output)
    }

    /// 流式下载：按批次惰性获取
    ///
    /// 校验在此处同步完成，返回的流在首次拉取时才开始下载
    pub fn stream(&self, file_id: FileId, chunks: Vec<ChunkRecord>) -> EngineResult<ChunkStream> {
        let chunks = self.prepare(file_id, chunks)?;
        info!(
            "开始流式下载: file_id={}, 分片数={}, 并发数={}",
            file_id,
            chunks.len(),
            self.concurrency
        );
        Ok(ChunkStream::new(self.clone(), file_id, chunks))
    }

    /// 并发下载一批分片，结果按批内位置返回
    pub(crate) async fn fetch_batch(&self, batch: &[ChunkRecord]) -> EngineResult<Vec<Vec<u8>>> {
        let mut join_set: JoinSet<(usize, EngineResult<Vec<u8>>)> = JoinSet::new();

        for (position, chunk) in batch.iter().enumerate() {
            let client = self.pool.by_index(chunk.credential_index)?;
            let retry = self.retry;
            let chunk = chunk.clone();
            join_set.spawn(async move { (position, fetch_chunk(client, retry, chunk).await) });
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; batch.len()];
        let mut first_error: Option<(usize, EngineError)> = None;

        while let Some(joined) = join_set.join_next().await {
            let (position, result) = match joined {
                Ok(r) => r,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    error!("分片下载任务异常: {}", e);
                    return Err(EngineError::Cancelled { file_id: None });
                }
            };

            match result {
                Ok(data) => slots[position] = Some(data),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(p, _)| position < *p) {
                        first_error = Some((position, e));
                    }
                }
            }
        }

        if let Some((_, e)) = first_error {
            return Err(e);
        }
        Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
    }
}
