// 元数据持久化模块
//
// 引擎只依赖两个协作接口：
// - ChunkStore: 分片元数据的追加写入、有序读取、整体删除
// - FileRecordService: 分片 0 上传成功后生成文件 ID
//
// 提供 SQLite 实现（生产）和内存实现（嵌入/测试）

pub mod memory;
pub mod sqlite;
pub mod types;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use types::{ChunkRecord, FileId, FileRecord, FirstChunkResult, FolderId, NewFile};

use anyhow::Result;
use async_trait::async_trait;

/// 分片元数据存储
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// 写入一条分片记录（每个分片成功后立即写入）
    async fn create_chunk(&self, record: &ChunkRecord) -> Result<()>;

    /// 按 chunk_index 升序列出文件的所有分片
    async fn list_chunks(&self, file_id: FileId) -> Result<Vec<ChunkRecord>>;

    /// 删除文件的所有分片记录，返回删除条数
    async fn delete_chunks(&self, file_id: FileId) -> Result<usize>;
}

/// 文件记录服务
#[async_trait]
pub trait FileRecordService: Send + Sync {
    /// 分片 0 上传成功后调用一次，生成文件 ID
    async fn mint_file_id(&self, file: &NewFile, first_chunk: &FirstChunkResult)
        -> Result<FileId>;
}
