//! Block-height cache for derived values.
//!
//! Entries are tagged with the indexed block height they were computed at. A
//! reader asks for a value at the current height:
//!
//! | Stored entry                 | Outcome                               |
//! |------------------------------|---------------------------------------|
//! | none                         | miss → compute and write              |
//! | older height                 | stale → compute and overwrite         |
//! | current height, decodes      | hit → return stored value             |
//! | current height, bad shape    | malformed → discard, compute, write   |
//!
//! None of these is an error for the caller. The read/compute/write cycle for a
//! key runs under that key's lock, and the write only happens after the
//! compute succeeded, so abandoning a request never leaves a partial entry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db;
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub block_height: u64,
    pub data: String,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn write(&self, key: &str, block_height: u64, data: &str) -> Result<()>;
    async fn discard(&self, key: &str) -> Result<()>;
}

/// Cache persisted in the indexer's SQLite database.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        db::read_cache_entry(&self.pool, key).await
    }

    async fn write(&self, key: &str, block_height: u64, data: &str) -> Result<()> {
        db::write_cache_entry(&self.pool, key, block_height, data).await
    }

    async fn discard(&self, key: &str) -> Result<()> {
        db::delete_cache_entry(&self.pool, key).await
    }
}

/// One async lock per cache key.
#[derive(Default)]
pub struct KeyedLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Return the value cached under `key` at `block_height`, computing and
/// storing it when the entry is missing, stale or malformed.
///
/// Storage failures are logged and degrade to recomputation; only `compute`
/// errors reach the caller.
pub async fn load_or_compute<T, F, Fut>(
    store: &dyn CacheStore,
    locks: &KeyedLocks,
    key: &str,
    block_height: u64,
    compute: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock = locks.lock_for(key);
    let _guard = lock.lock().await;

    match store.read(key).await {
        Ok(Some(entry)) if entry.block_height >= block_height => {
            match serde_json::from_str::<T>(&entry.data) {
                Ok(value) => {
                    debug!("Cache hit for {key} at block {}", entry.block_height);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Discarding malformed cache entry {key}: {e}");
                    if let Err(e) = store.discard(key).await {
                        warn!("Could not discard cache entry {key}: {e}");
                    }
                }
            }
        }
        Ok(Some(entry)) => {
            debug!(
                "Cache entry {key} is stale (block {} < {block_height})",
                entry.block_height
            );
        }
        Ok(None) => debug!("Cache miss for {key}"),
        Err(e) => warn!("Cache read failed for {key}, recomputing: {e}"),
    }

    let value = compute().await?;

    match serde_json::to_string(&value) {
        Ok(data) => {
            if let Err(e) = store.write(key, block_height, &data).await {
                warn!("Cache write failed for {key}: {e}");
            }
        }
        Err(e) => warn!("Could not serialize cache value for {key}: {e}"),
    }

    Ok(value)
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    /// In-process cache for tests.
    #[derive(Default)]
    pub struct MemoryCache {
        pub entries: RwLock<HashMap<String, CacheEntry>>,
    }

    #[async_trait]
    impl CacheStore for MemoryCache {
        async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
            Ok(self.entries.read().await.get(key).cloned())
        }

        async fn write(&self, key: &str, block_height: u64, data: &str) -> Result<()> {
            self.entries.write().await.insert(
                key.to_string(),
                CacheEntry {
                    block_height,
                    data: data.to_string(),
                },
            );
            Ok(())
        }

        async fn discard(&self, key: &str) -> Result<()> {
            self.entries.write().await.remove(key);
            Ok(())
        }
    }
}
