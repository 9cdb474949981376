// 测试辅助：内存传输客户端
//
// 支持按分片名/文件 ID/消息 ID 注入失败、设置上传/下载延迟、统计调用次数
// 与 Bot API 一致，拒绝空文件

use crate::transport::{ChunkTransport, RemoteMessage, TransportError, TransportPool};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryTransport {
    /// file_id -> (message_id, 数据)
    blobs: Mutex<HashMap<String, (i64, Vec<u8>)>>,
    next_message_id: AtomicI64,
    /// 依次弹出的发送失败
    send_failures: Mutex<VecDeque<TransportError>>,
    /// 名称包含这些片段的分片总是发送失败
    always_fail_names: Mutex<Vec<String>>,
    /// file_id -> 剩余失败次数
    fetch_failures: Mutex<HashMap<String, (u32, TransportError)>>,
    /// file_id -> 下载延迟
    fetch_delays: Mutex<HashMap<String, Duration>>,
    /// 删除失败的 message_id
    delete_failures: Mutex<HashSet<i64>>,
    /// 发送延迟
    send_delay: Mutex<Duration>,
    /// 名称以这些后缀结尾的分片使用单独的发送延迟
    send_delays_by_name: Mutex<Vec<(String, Duration)>>,
    pub sends: AtomicUsize,
    pub fetches: AtomicUsize,
    pub deletes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// 发送成功的分片名（按完成顺序）
    pub sent_names: Mutex<Vec<String>>,
    /// 发送开始 (`+名称`) 与结束 (`-名称`) 事件，按发生顺序
    pub send_events: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.send_failures.lock().extend(errors);
    }

    pub fn always_fail_send(&self, name_fragment: &str) {
        self.always_fail_names.lock().push(name_fragment.to_string());
    }

    pub fn fail_fetch(&self, file_id: &str, times: u32, error: TransportError) {
        self.fetch_failures
            .lock()
            .insert(file_id.to_string(), (times, error));
    }

    pub fn delay_fetch(&self, file_id: &str, delay: Duration) {
        self.fetch_delays.lock().insert(file_id.to_string(), delay);
    }

    pub fn fail_delete(&self, message_id: i64) {
        self.delete_failures.lock().insert(message_id);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    pub fn delay_send(&self, name_suffix: &str, delay: Duration) {
        self.send_delays_by_name
            .lock()
            .push((name_suffix.to_string(), delay));
    }

    /// 按 file_id 读取已保存的 blob
    pub fn blob(&self, file_id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(file_id).map(|(_, data)| data.clone())
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn contains_message(&self, message_id: i64) -> bool {
        self.blobs.lock().values().any(|(id, _)| *id == message_id)
    }

    /// 直接放入一个 blob（绕过 send）
    pub fn put(&self, file_id: &str, data: Vec<u8>) -> i64 {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .insert(file_id.to_string(), (message_id, data));
        message_id
    }
}

#[async_trait]
impl ChunkTransport for MemoryTransport {
    async fn send(
        &self,
        _channel: &str,
        data: Vec<u8>,
        name: &str,
    ) -> Result<RemoteMessage, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.send_events.lock().push(format!("+{}", name));
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .send_delays_by_name
            .lock()
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .map(|(_, delay)| *delay)
            .unwrap_or_else(|| *self.send_delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.send_events.lock().push(format!("-{}", name));

        if data.is_empty() {
            return Err(TransportError::Rejected {
                code: 400,
                message: "Bad Request: file must be non-empty".to_string(),
            });
        }

        if let Some(error) = self.send_failures.lock().pop_front() {
            return Err(error);
        }
        if self
            .always_fail_names
            .lock()
            .iter()
            .any(|fragment| name.contains(fragment.as_str()))
        {
            return Err(TransportError::Server {
                status: 502,
                message: "Bad Gateway".to_string(),
            });
        }

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let file_id = format!("doc-{}-{}", message_id, name);
        self.blobs
            .lock()
            .insert(file_id.clone(), (message_id, data));
        self.sent_names.lock().push(name.to_string());

        Ok(RemoteMessage {
            message_id,
            file_id,
        })
    }

    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = self.fetch_delays.lock().get(file_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.fetch_failures.lock();
            if let Some((remaining, error)) = failures.get_mut(file_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }

        self.blobs
            .lock()
            .get(file_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| TransportError::Rejected {
                code: 400,
                message: "Bad Request: invalid file_id".to_string(),
            })
    }

    async fn delete(&self, _channel: &str, message_id: i64) -> Result<(), TransportError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);

        if self.delete_failures.lock().contains(&message_id) {
            return Err(TransportError::Rejected {
                code: 400,
                message: "Bad Request: message can't be deleted".to_string(),
            });
        }

        let mut blobs = self.blobs.lock();
        let before = blobs.len();
        blobs.retain(|_, (id, _)| *id != message_id);
        if blobs.len() == before {
            return Err(TransportError::Rejected {
                code: 400,
                message: "Bad Request: message to delete not found".to_string(),
            });
        }
        Ok(())
    }
}

/// 由多个内存客户端组成的凭证池
pub fn memory_pool(n: usize) -> (Arc<TransportPool>, Vec<Arc<MemoryTransport>>) {
    let transports: Vec<Arc<MemoryTransport>> =
        (0..n).map(|_| Arc::new(MemoryTransport::new())).collect();
    let clients = transports
        .iter()
        .map(|t| t.clone() as Arc<dyn ChunkTransport>)
        .collect();
    let pool = TransportPool::new(clients).expect("非空凭证池");
    (Arc::new(pool), transports)
}

/// 生成确定性的测试数据
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
