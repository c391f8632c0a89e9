//! TTL 键值缓存：对任意可序列化结果做带过期时间的记忆化
//!
//! 条目存于 KvStore（前缀 `cache:`），过期条目对读取不可见，并在读到时惰性删除。
//! 缓存本身不理解值的语义，键由写入方（路由器等）自行构造。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::storage::{get_json, set_json, KvStore, StorageError};

const CACHE_PREFIX: &str = "cache:";

/// 缓存条目：值 + 过期时间戳（毫秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// 只关心过期时间的条目视图，用于清理与容量裁剪
#[derive(Deserialize)]
struct EntryHeader {
    expires_at: i64,
}

pub struct TtlCache {
    store: Arc<dyn KvStore>,
    /// 容量上限；None 表示不限
    max_entries: Option<usize>,
    /// 容量裁剪是读-改-写，串行化以避免并发写入方互相踩踏
    cap_lock: Mutex<()>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn storage_key(key: &str) -> String {
    format!("{CACHE_PREFIX}{key}")
}

impl TtlCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            max_entries: None,
            cap_lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }

    /// 读取未过期的值；过期条目在此删除并返回 None
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let skey = storage_key(key);
        let Some(entry) = get_json::<CacheEntry<T>>(self.store.as_ref(), &skey).await? else {
            return Ok(None);
        };
        if entry.is_expired(now_ms()) {
            tracing::debug!(key, "cache entry expired");
            self.store.delete(&skey).await?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// 写入并设置 TTL；配置了容量上限时顺带裁剪
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StorageError> {
        let entry = CacheEntry {
            value,
            expires_at: now_ms() + ttl.as_millis() as i64,
        };
        match self.max_entries {
            Some(max) => {
                let _guard = self.cap_lock.lock().await;
                set_json(self.store.as_ref(), &storage_key(key), &entry).await?;
                self.enforce_capacity(max).await
            }
            None => set_json(self.store.as_ref(), &storage_key(key), &entry).await,
        }
    }

    /// 记忆化：命中直接返回，否则执行 f 并缓存其结果（f 失败不写缓存）
    pub async fn get_or_insert_with<T, E, F, Fut>(&self, key: &str, ttl: Duration, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StorageError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await? {
            return Ok(hit);
        }
        let value = f().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    pub async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.store.delete(&storage_key(key)).await
    }

    /// 删除全部已过期条目，返回删除数
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = now_ms();
        let mut removed = 0;
        for skey in self.store.list_keys(CACHE_PREFIX).await? {
            if let Some(h) = get_json::<EntryHeader>(self.store.as_ref(), &skey).await? {
                if now >= h.expires_at && self.store.delete(&skey).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        for skey in self.store.list_keys(CACHE_PREFIX).await? {
            self.store.delete(&skey).await?;
        }
        Ok(())
    }

    /// 当前条目数（含尚未被惰性清理的过期条目）
    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.store.list_keys(CACHE_PREFIX).await?.len())
    }

    /// 超出上限时先清过期，再按最早过期优先淘汰
    async fn enforce_capacity(&self, max: usize) -> Result<(), StorageError> {
        let keys = self.store.list_keys(CACHE_PREFIX).await?;
        if keys.len() <= max {
            return Ok(());
        }
        let now = now_ms();
        let mut live: Vec<(i64, String)> = Vec::with_capacity(keys.len());
        for skey in keys {
            match get_json::<EntryHeader>(self.store.as_ref(), &skey).await? {
                Some(h) if now < h.expires_at => live.push((h.expires_at, skey)),
                _ => {
                    self.store.delete(&skey).await?;
                }
            }
        }
        if live.len() > max {
            live.sort_by_key(|(exp, _)| *exp);
            let excess = live.len() - max;
            for (_, skey) in live.into_iter().take(excess) {
                self.store.delete(&skey).await?;
            }
        }
        Ok(())
    }
}
