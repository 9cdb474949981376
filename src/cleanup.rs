// 远端分片清理
//
// 尽力而为的删除协调：
// - 每个分片按记录的凭证索引回查客户端并删除消息
// - 单文件的所有删除请求同时发出，不设并发上限
// - 删除失败只记录日志，从不向调用方返回错误
// - 所有删除请求结束后（无论成败）才删除本地分片记录

use crate::persistence::{ChunkRecord, ChunkStore, FileId};
use crate::transport::TransportPool;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单个文件的清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub file_id: FileId,
    /// 分片记录数
    pub attempted: usize,
    /// 远端删除成功数
    pub deleted: usize,
    /// 远端删除失败数（已忽略）
    pub failed: usize,
    /// 删除的本地分片记录数
    pub metadata_removed: usize,
}

impl DeletionReport {
    /// 远端是否全部清理干净
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// 删除协调器
pub struct ChunkDeleter {
    pool: Arc<TransportPool>,
    store: Arc<dyn ChunkStore>,
}

impl ChunkDeleter {
    pub fn new(pool: Arc<TransportPool>, store: Arc<dyn ChunkStore>) -> Self {
        Self { pool, store }
    }

    /// 删除单个文件的所有远端分片，然后删除本地分片记录
    pub async fn delete_file_blobs(&self, channel: &str, file_id: FileId) -> DeletionReport {
        let mut report = DeletionReport {
            file_id,
            ..Default::default()
        };

        let chunks = match self.store.list_chunks(file_id).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("读取分片记录失败，跳过远端清理: file_id={}, 错误: {:#}", file_id, e);
                return report;
            }
        };
        report.attempted = chunks.len();

        let results = join_all(
            chunks
                .iter()
                .map(|chunk| self.delete_chunk(channel, chunk)),
        )
        .await;
        report.deleted = results.iter().filter(|ok| **ok).count();
        report.failed = report.attempted - report.deleted;

        match self.store.delete_chunks(file_id).await {
            Ok(removed) => report.metadata_removed = removed,
            Err(e) => warn!("删除分片记录失败: file_id={}, 错误: {:#}", file_id, e),
        }

        info!(
            "文件分片清理完成: file_id={}, 分片数={}, 成功={}, 失败={}",
            file_id, report.attempted, report.deleted, report.failed
        );
        report
    }

    /// 批量清理（文件夹或存储级联删除）
    ///
    /// 各文件并发执行，返回顺序与输入一致
    pub async fn delete_files_blobs(&self, channel: &str, file_ids: &[FileId]) -> Vec<DeletionReport> {
        info!("批量清理 {} 个文件的远端分片", file_ids.len());
        join_all(
            file_ids
                .iter()
                .map(|file_id| self.delete_file_blobs(channel, *file_id)),
        )
        .await
    }

    /// 删除单个分片消息，返回是否成功
    async fn delete_chunk(&self, channel: &str, chunk: &ChunkRecord) -> bool {
        let client = match self.pool.by_index(chunk.credential_index) {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    "[分片#{}] 无法删除: file_id={}, {}",
                    chunk.chunk_index, chunk.file_id, e
                );
                return false;
            }
        };

        match client.delete(channel, chunk.external_message_id).await {
            Ok(()) => {
                debug!(
                    "[分片#{}] 远端消息已删除: message_id={}",
                    chunk.chunk_index, chunk.external_message_id
                );
                true
            }
            Err(e) => {
                warn!(
                    "[分片#{}] 远端删除失败（忽略）: file_id={}, message_id={}, 错误: {}",
                    chunk.chunk_index, chunk.file_id, chunk.external_message_id, e
                );
                false
            }
        }
    }
}
