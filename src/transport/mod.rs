// 传输层模块
//
// 外部消息平台的频道是唯一的持久化存储：
// - 每个 Bot 凭证对应一个 ChunkTransport 客户端
// - TransportPool 负责轮询分配和按索引回查

pub mod client;
pub mod pool;
pub mod types;

pub use client::TelegramClient;
pub use pool::TransportPool;
pub use types::{RemoteMessage, TransportError};

use async_trait::async_trait;

/// 单个凭证的传输客户端
///
/// 同一分片的上传、下载、删除必须使用同一个凭证的客户端，
/// 远端标识的可见性与发送方凭证绑定
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// 发送分片数据到频道，返回远端标识
    async fn send(
        &self,
        channel: &str,
        data: Vec<u8>,
        name: &str,
    ) -> Result<RemoteMessage, TransportError>;

    /// 按远端文件 ID 获取分片数据
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;

    /// 删除频道中的消息
    async fn delete(&self, channel: &str, message_id: i64) -> Result<(), TransportError>;
}
