// 上传进度

use std::time::Duration;

/// 上传进度快照（每个分片完成后上报一次）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    /// 已完成分片数
    pub uploaded_chunks: usize,
    /// 分片总数
    pub total_chunks: usize,
    /// 已上传字节数
    pub uploaded_bytes: u64,
    /// 文件总大小
    pub total_bytes: u64,
    /// 已用时间
    pub elapsed: Duration,
}

impl UploadProgress {
    /// 上传进度百分比
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.uploaded_chunks >= self.total_chunks {
                100.0
            } else {
                0.0
            };
        }
        (self.uploaded_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    /// 平均速度（字节/秒）
    pub fn speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.uploaded_bytes as f64 / secs) as u64
        } else {
            0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks >= self.total_chunks
    }
}
