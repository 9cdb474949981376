// 上传分片规划
//
// 纯函数：(文件大小, 分片大小) -> 有序的 (索引, 字节范围) 列表
// - 范围左闭右开，最后一个分片可能不足 chunk_size
// - 空文件也产生一个空分片，保证"先上传分片 0"总有分片 0
// - 除空文件外，不会出现空范围

use std::ops::Range;

/// 默认分片大小: 20MB（Bot API 下载上限）
pub const DEFAULT_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// 分片大小上限: 20MB
pub const MAX_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// 规划好的分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl PlannedChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 文件分片计划
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunks: Vec<PlannedChunk>,
    total_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// 创建分片计划
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小（0 按 1 处理）
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunks: Self::calculate_chunks(total_size, chunk_size),
            total_size,
            chunk_size,
        }
    }

    /// 计算分片
    fn calculate_chunks(total_size: u64, chunk_size: u64) -> Vec<PlannedChunk> {
        if total_size == 0 {
            return vec![PlannedChunk::new(0, 0..0)];
        }

        let mut chunks = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
        let mut offset = 0u64;
        let mut index = 0;

        while offset < total_size {
            let end = std::cmp::min(offset.saturating_add(chunk_size), total_size);
            chunks.push(PlannedChunk::new(index, offset..end));
            offset = end;
            index += 1;
        }

        chunks
    }

    /// 获取所有分片
    pub fn chunks(&self) -> &[PlannedChunk] {
        &self.chunks
    }

    /// 获取分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 分片 0 与其余分片
    pub fn split_first(&self) -> (&PlannedChunk, &[PlannedChunk]) {
        // calculate_chunks 至少返回一个分片
        let (first, rest) = self
            .chunks
            .split_first()
            .unwrap_or_else(|| unreachable!("分片计划为空"));
        (first, rest)
    }
}
