// 文件内容缓存
//
// 短时间内重复下载同一文件时跳过重新拼装：
// - 条目超过 TTL 视为未命中并立即移除
// - 超过单条上限的内容不缓存
// - 按插入顺序淘汰最早的条目，总大小始终不超过预算
//
// 缓存不影响正确性，调用方必须能在永久未命中时正常工作

use crate::config::CacheConfig;
use crate::persistence::FileId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// 默认 TTL（秒）
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// 默认单条上限 10MB
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

/// 默认总预算 50MB
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 50 * 1024 * 1024;

struct CacheEntry {
    data: Arc<Vec<u8>>,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FileId, CacheEntry>,
    /// 插入顺序（最早的在前）
    order: VecDeque<FileId>,
    total_bytes: u64,
}

impl CacheState {
    fn remove(&mut self, file_id: FileId) -> bool {
        match self.entries.remove(&file_id) {
            Some(entry) => {
                self.total_bytes -= entry.data.len() as u64;
                self.order.retain(|id| *id != file_id);
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some(file_id) = self.order.pop_front() {
            if let Some(entry) = self.entries.remove(&file_id) {
                self.total_bytes -= entry.data.len() as u64;
                debug!("缓存淘汰: file_id={}, 大小={} bytes", file_id, entry.data.len());
                return true;
            }
        }
        false
    }
}

/// 文件内容缓存
pub struct BlobCache {
    ttl: Duration,
    max_entry_bytes: u64,
    max_total_bytes: u64,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlobCache")
            .field("ttl", &self.ttl)
            .field("entries", &state.entries.len())
            .field("total_bytes", &state.total_bytes)
            .field("max_total_bytes", &self.max_total_bytes)
            .finish()
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            DEFAULT_MAX_ENTRY_BYTES,
            DEFAULT_MAX_TOTAL_BYTES,
        )
    }
}

impl BlobCache {
    pub fn new(ttl: Duration, max_entry_bytes: u64, max_total_bytes: u64) -> Self {
        Self {
            ttl,
            max_entry_bytes,
            max_total_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            Duration::from_secs(config.ttl_secs),
            config.max_entry_bytes,
            config.max_total_bytes,
        )
    }

    pub fn get(&self, file_id: FileId) -> Option<Arc<Vec<u8>>> {
        self.get_at(file_id, Instant::now())
    }

    /// 以给定时间判断过期
    pub fn get_at(&self, file_id: FileId, now: Instant) -> Option<Arc<Vec<u8>>> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(&file_id) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
        };

        if expired {
            debug!("缓存过期: file_id={}", file_id);
            state.remove(file_id);
            return None;
        }
        state.entries.get(&file_id).map(|entry| entry.data.clone())
    }

    /// 写入缓存，返回是否实际写入
    pub fn set(&self, file_id: FileId, data: Vec<u8>) -> bool {
        self.set_at(file_id, data, Instant::now())
    }

    pub fn set_at(&self, file_id: FileId, data: Vec<u8>, now: Instant) -> bool {
        let size = data.len() as u64;
        if !self.accepts(size) {
            debug!(
                "内容过大，跳过缓存: file_id={}, 大小={} bytes",
                file_id, size
            );
            return false;
        }

        let mut state = self.state.lock();
        state.remove(file_id);

        while state.total_bytes + size > self.max_total_bytes {
            if !state.evict_oldest() {
                return false;
            }
        }

        state.total_bytes += size;
        state.order.push_back(file_id);
        state.entries.insert(
            file_id,
            CacheEntry {
                data: Arc::new(data),
                inserted_at: now,
            },
        );
        true
    }

    /// 给定大小的内容是否可能被缓存
    pub fn accepts(&self, size: u64) -> bool {
        size <= self.max_entry_bytes && size <= self.max_total_bytes
    }

    pub fn remove(&self, file_id: FileId) -> bool {
        self.state.lock().remove(file_id)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前缓存总字节数
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }
}
