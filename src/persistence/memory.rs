// 内存元数据存储
//
// 用于嵌入场景和测试，进程退出后数据丢失

use super::types::{ChunkRecord, FileId, FirstChunkResult, NewFile};
use super::{ChunkStore, FileRecordService};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    /// file_id -> (chunk_index -> 记录)
    chunks: Mutex<HashMap<FileId, BTreeMap<usize, ChunkRecord>>>,
    /// 已生成的文件记录
    files: Mutex<HashMap<FileId, NewFile>>,
    next_file_id: AtomicI64,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            next_file_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// 已生成的文件记录
    pub fn file(&self, file_id: FileId) -> Option<NewFile> {
        self.files.lock().get(&file_id).cloned()
    }

    /// 文件的分片记录条数
    pub fn chunk_count(&self, file_id: FileId) -> usize {
        self.chunks.lock().get(&file_id).map_or(0, |c| c.len())
    }

    /// 直接写入分片记录（不检查重复，用于构造损坏的元数据）
    pub fn insert_raw(&self, record: ChunkRecord) {
        self.chunks
            .lock()
            .entry(record.file_id)
            .or_default()
            .insert(record.chunk_index, record);
    }
}

#[async_trait]
impl ChunkStore for MemoryMetadataStore {
    async fn create_chunk(&self, record: &ChunkRecord) -> Result<()> {
        let mut chunks = self.chunks.lock();
        let file_chunks = chunks.entry(record.file_id).or_default();
        if file_chunks.contains_key(&record.chunk_index) {
            bail!(
                "分片记录已存在: file_id={}, chunk_index={}",
                record.file_id,
                record.chunk_index
            );
        }
        file_chunks.insert(record.chunk_index, record.clone());
        Ok(())
    }

    async fn list_chunks(&self, file_id: FileId) -> Result<Vec<ChunkRecord>> {
        Ok(self
            .chunks
            .lock()
            .get(&file_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_chunks(&self, file_id: FileId) -> Result<usize> {
        Ok(self.chunks.lock().remove(&file_id).map_or(0, |c| c.len()))
    }
}

#[async_trait]
impl FileRecordService for MemoryMetadataStore {
    async fn mint_file_id(
        &self,
        file: &NewFile,
        _first_chunk: &FirstChunkResult,
    ) -> Result<FileId> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        self.files.lock().insert(file_id, file.clone());
        Ok(file_id)
    }
}
