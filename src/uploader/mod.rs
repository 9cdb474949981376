// 上传引擎模块
//
// - 分片规划（ChunkPlan）
// - 可按范围读取的数据源（内存 / 本地文件）
// - 分片 0 优先、固定窗口分批并发的上传引擎
// - 每分片完成后的进度上报

pub mod chunk;
pub mod engine;
pub mod progress;
pub mod source;

pub use chunk::{ChunkPlan, PlannedChunk, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use engine::{
    ProgressCallback, UploadEngine, UploadOutcome, UploadRequest, DEFAULT_UPLOAD_CONCURRENCY,
    EMPTY_CHUNK_PLACEHOLDER,
};
pub use progress::UploadProgress;
pub use source::{ByteSource, FileSource, MemorySource};
