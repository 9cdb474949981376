// 上传数据源
//
// 按字节范围读取，分片任务并发调用

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// 可按范围切片的字节源
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// 读取 [range.start, range.end) 的数据
    async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>>;
}

/// 内存数据源
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: std::sync::Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: std::sync::Arc::new(data),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        if range.start > range.end || range.end > self.len() {
            bail!(
                "读取范围越界: {}..{}, 数据大小 {}",
                range.start,
                range.end,
                self.len()
            );
        }
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }
}

/// 本地文件数据源
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件大小
    pub async fn len(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("无法读取文件信息: {:?}", self.path))?;
        Ok(metadata.len())
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let start = range.start;
        let size = range.end.saturating_sub(range.start) as usize;

        tokio::task::spawn_blocking(move || {
            let mut file =
                std::fs::File::open(&path).with_context(|| format!("无法打开文件: {:?}", path))?;
            file.seek(SeekFrom::Start(start))?;

            let mut buffer = vec![0u8; size];
            file.read_exact(&mut buffer)
                .with_context(|| format!("读取分片数据失败: offset={}, size={}", start, size))?;

            Ok(buffer)
        })
        .await?
    }
}
