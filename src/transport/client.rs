// Telegram Bot API 客户端实现

use crate::transport::types::{ApiResponse, FileInfo, Message};
use crate::transport::{ChunkTransport, RemoteMessage, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 默认 Bot API 地址
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot API 客户端（一个实例对应一个 Bot 凭证）
#[derive(Clone)]
pub struct TelegramClient {
    /// HTTP客户端
    client: Client,
    /// API 根地址
    api_base: String,
    /// Bot token（不出现在日志中）
    token: String,
    /// 凭证索引（仅用于日志）
    index: usize,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// 创建新的客户端
    ///
    /// # 参数
    /// * `api_base` - API 根地址（默认 https://api.telegram.org）
    /// * `token` - Bot token
    /// * `index` - 凭证在池中的索引
    /// * `timeout` - 单次请求超时
    pub fn new(api_base: &str, token: &str, index: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            index,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// 解析 Bot API 响应
    ///
    /// 错误状态码的响应体同样是 JSON，需要先解析再按 error_code 分类
    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        method: &str,
    ) -> Result<T, TransportError> {
        let status = response.status();
        let body = response.text().await?;

        let api_response: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(e) => {
                if status.is_server_error() {
                    return Err(TransportError::Server {
                        status: status.as_u16(),
                        message: body,
                    });
                }
                return Err(TransportError::Decode(format!(
                    "{}: status={}, error={}",
                    method, status, e
                )));
            }
        };

        api_response.into_result().map_err(|e| {
            if matches!(e, TransportError::RateLimited { .. }) {
                warn!("[Bot#{}] {} 触发限流: {}", self.index, method, e);
            } else {
                error!("[Bot#{}] {} 调用失败: {}", self.index, method, e);
            }
            e
        })
    }
}

#[async_trait]
impl ChunkTransport for TelegramClient {
    async fn send(
        &self,
        channel: &str,
        data: Vec<u8>,
        name: &str,
    ) -> Result<RemoteMessage, TransportError> {
        let size = data.len();
        debug!(
            "[Bot#{}] 发送分片: channel={}, name={}, size={}",
            self.index, channel, name, size
        );

        let part = multipart::Part::bytes(data)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .text("chat_id", channel.to_string())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        let message: Message = self.parse_response(response, "sendDocument").await?;
        let document = message
            .document
            .ok_or_else(|| TransportError::Decode("sendDocument 响应缺少 document".to_string()))?;

        debug!(
            "[Bot#{}] 分片发送成功: message_id={}, size={}",
            self.index, message.message_id, size
        );

        Ok(RemoteMessage {
            message_id: message.message_id,
            file_id: document.file_id,
        })
    }

    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        // 1. getFile 获取文件路径
        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        let info: FileInfo = self.parse_response(response, "getFile").await?;
        let file_path = info.file_path.ok_or_else(|| {
            TransportError::Decode(format!("getFile 未返回 file_path: {}", info.file_id))
        })?;

        // 2. 下载文件内容
        let response = self.client.get(self.file_url(&file_path)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_api_error(
                status.as_u16(),
                format!("下载分片内容失败: {}", status),
                None,
            ));
        }

        let bytes = response.bytes().await?;
        debug!("[Bot#{}] 分片下载完成: size={}", self.index, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn delete(&self, channel: &str, message_id: i64) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.method_url("deleteMessage"))
            .json(&serde_json::json!({
                "chat_id": channel,
                "message_id": message_id,
            }))
            .send()
            .await?;

        let _deleted: bool = self.parse_response(response, "deleteMessage").await?;
        debug!(
            "[Bot#{}] 消息已删除: channel={}, message_id={}",
            self.index, channel, message_id
        );
        Ok(())
    }
}
