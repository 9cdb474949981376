// 元数据类型定义

use serde::{Deserialize, Serialize};

/// 文件 ID（由文件记录服务生成）
pub type FileId = i64;

/// 文件夹 ID
pub type FolderId = i64;

/// 分片元数据记录
///
/// 一个文件的所有分片按 chunk_index 排序后，覆盖 [0, file_size) 且无重叠，
/// chunk_index 从 0 开始连续编号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// 所属文件
    pub file_id: FileId,
    /// 分片索引（决定重组顺序）
    pub chunk_index: usize,
    /// 远端消息 ID（删除时使用）
    pub external_message_id: i64,
    /// 远端文件 ID（下载时使用）
    pub external_file_id: String,
    /// 上传该分片的凭证索引
    pub credential_index: usize,
    /// 分片大小
    pub byte_size: u64,
}

/// 待创建的文件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    /// 文件名
    pub name: String,
    /// 文件总大小
    pub size: u64,
    /// MIME 类型
    #[serde(default)]
    pub mime_type: Option<String>,
    /// 目标文件夹（None 表示根目录）
    #[serde(default)]
    pub folder_id: Option<FolderId>,
}

impl NewFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: None,
            folder_id: None,
        }
    }

    pub fn in_folder(mut self, folder_id: Option<FolderId>) -> Self {
        self.folder_id = folder_id;
        self
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

/// 已存储的文件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub folder_id: Option<FolderId>,
    /// 创建时间（Unix 秒）
    pub created_at: i64,
}

/// 分片 0 上传成功后的结果（用于生成文件记录）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstChunkResult {
    pub external_message_id: i64,
    pub external_file_id: String,
    pub credential_index: usize,
    pub byte_size: u64,
}
