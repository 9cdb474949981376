// 凭证池
//
// 纯选择器，不包含任何重试/退避逻辑：
// - next(): 严格轮询（原子自增后取模），并发安全
// - by_index(): 按分片记录中的凭证索引回查客户端

use crate::error::{EngineError, EngineResult};
use crate::transport::{ChunkTransport, TelegramClient};
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 多凭证传输池
pub struct TransportPool {
    /// 所有凭证的客户端（顺序即凭证索引）
    clients: Vec<Arc<dyn ChunkTransport>>,
    /// 轮询计数器
    cursor: AtomicUsize,
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("size", &self.clients.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransportPool {
    /// 从客户端列表创建
    ///
    /// 列表为空时返回 `NoCredentialsConfigured`
    pub fn new(clients: Vec<Arc<dyn ChunkTransport>>) -> EngineResult<Self> {
        if clients.is_empty() {
            return Err(EngineError::NoCredentialsConfigured);
        }

        Ok(Self {
            clients,
            cursor: AtomicUsize::new(0),
        })
    }

    /// 从 Bot token 列表创建 Telegram 客户端池
    pub fn from_tokens(api_base: &str, tokens: &[String], timeout: Duration) -> Result<Self> {
        let clients = tokens
            .iter()
            .enumerate()
            .map(|(index, token)| {
                TelegramClient::new(api_base, token, index, timeout)
                    .map(|c| Arc::new(c) as Arc<dyn ChunkTransport>)
            })
            .collect::<Result<Vec<_>>>()?;

        let pool = Self::new(clients)?;
        info!("凭证池初始化完成: {} 个 Bot", pool.len());
        Ok(pool)
    }

    /// 凭证数量
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// 按轮询顺序取下一个凭证，返回 (客户端, 凭证索引)
    pub fn next(&self) -> (Arc<dyn ChunkTransport>, usize) {
        // fetch_add 在 usize::MAX 处回绕，取模结果仍保持均匀
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        (self.clients[index].clone(), index)
    }

    /// 按凭证索引取客户端
    pub fn by_index(&self, index: usize) -> EngineResult<Arc<dyn ChunkTransport>> {
        self.clients
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidCredentialIndex {
                index,
                pool_size: self.clients.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use std::collections::HashMap;

    fn pool_of(n: usize) -> TransportPool {
        let clients = (0..n)
            .map(|_| Arc::new(MemoryTransport::new()) as Arc<dyn ChunkTransport>)
            .collect();
        TransportPool::new(clients).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = TransportPool::new(vec![]);
        assert!(matches!(result, Err(EngineError::NoCredentialsConfigured)));
    }

    #[test]
    fn test_round_robin_order() {
        let pool = pool_of(3);
        let indices: Vec<usize> = (0..7).map(|_| pool.next().1).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_by_index() {
        let pool = pool_of(2);
        assert!(pool.by_index(0).is_ok());
        assert!(pool.by_index(1).is_ok());
        match pool.by_index(2) {
            Err(EngineError::InvalidCredentialIndex { index, pool_size }) => {
                assert_eq!(index, 2);
                assert_eq!(pool_size, 2);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_round_robin_concurrent() {
        let n = 4;
        let pool = Arc::new(pool_of(n));

        let mut handles = Vec::new();
        for _ in 0..(3 * n) {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.next().1 }));
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), n);
        for index in 0..n {
            assert_eq!(counts[&index], 3, "credential {} visited unevenly", index);
        }

        // 计数器推进了 3N 次，下一次回到 0
        assert_eq!(pool.next().1, 0);
    }

    #[test]
    fn test_from_tokens() {
        let tokens = vec!["1:a".to_string(), "2:b".to_string()];
        let pool =
            TransportPool::from_tokens("http://127.0.0.1:1", &tokens, Duration::from_secs(5))
                .unwrap();
        assert_eq!(pool.len(), 2);

        let result = TransportPool::from_tokens("http://127.0.0.1:1", &[], Duration::from_secs(5));
        assert!(result.is_err());
    }
}
