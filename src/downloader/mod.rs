// 下载引擎模块
//
// - 分片序列校验
// - 缓冲下载（完整文件）
// - 流式下载（按批惰性拉取，可提前结束）

pub mod engine;
pub mod stream;

pub use engine::{validate_sequence, DownloadEngine, DEFAULT_DOWNLOAD_CONCURRENCY};
pub use stream::ChunkStream;
