// 流式下载
//
// 惰性、有限、不可重启的分片序列：
// - 每次缓冲区耗尽时才下载下一批，等待期间挂起
// - 消费方可随时停止（close 或直接丢弃），之后不再发起任何请求
// - 出错后流结束

use crate::downloader::DownloadEngine;
use crate::error::EngineResult;
use crate::persistence::{ChunkRecord, FileId};
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use tracing::{debug, info};

pub struct ChunkStream {
    engine: DownloadEngine,
    file_id: FileId,
    /// 已校验、按 chunk_index 排序的分片
    chunks: Vec<ChunkRecord>,
    /// 下一批的起始位置
    next_position: usize,
    /// 当前批已下载、尚未交付的数据
    buffered: VecDeque<Vec<u8>>,
    closed: bool,
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("file_id", &self.file_id)
            .field("total_chunks", &self.chunks.len())
            .field("next_position", &self.next_position)
            .field("buffered", &self.buffered.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ChunkStream {
    pub(crate) fn new(engine: DownloadEngine, file_id: FileId, chunks: Vec<ChunkRecord>) -> Self {
        Self {
            engine,
            file_id,
            chunks,
            next_position: 0,
            buffered: VecDeque::new(),
            closed: false,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// 文件分片总数
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// 尚未交付的分片数
    pub fn remaining(&self) -> usize {
        if self.closed {
            return 0;
        }
        self.chunks.len() - self.next_position + self.buffered.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 停止拉取，丢弃已缓冲的数据
    pub fn close(&mut self) {
        if !self.closed {
            info!(
                "流式下载提前结束: file_id={}, 剩余分片={}",
                self.file_id,
                self.remaining()
            );
        }
        self.closed = true;
        self.buffered.clear();
    }

    /// 取下一个分片的数据，全部交付或已关闭时返回 None
    pub async fn next_chunk(&mut self) -> Option<EngineResult<Vec<u8>>> {
        if self.closed {
            return None;
        }
        if let Some(data) = self.buffered.pop_front() {
            return Some(Ok(data));
        }
        if self.next_position >= self.chunks.len() {
            self.closed = true;
            return None;
        }

        let end = (self.next_position + self.engine.concurrency()).min(self.chunks.len());
        debug!(
            "流式下载批次: file_id={}, 分片 #{}..#{}",
            self.file_id, self.next_position, end
        );

        match self
            .engine
            .fetch_batch(&self.chunks[self.next_position..end])
            .await
        {
            Ok(batch) => {
                self.next_position = end;
                self.buffered.extend(batch);
                self.buffered.pop_front().map(Ok)
            }
            Err(e) => {
                self.closed = true;
                Some(Err(e))
            }
        }
    }

    /// 转换为 futures Stream
    pub fn into_stream(self) -> impl Stream<Item = EngineResult<Vec<u8>>> + Send {
        stream::unfold(self, |mut chunks| async move {
            chunks.next_chunk().await.map(|item| (item, chunks))
        })
    }
}
