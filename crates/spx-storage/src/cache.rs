use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::{KvStore, Result, StorageError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachedStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

struct Inner {
    lru: LruCache<(String, String), Vec<u8>>,
    stats: CachedStoreStats,
}

/// Write-through LRU cache in front of a [`KvStore`].
///
/// Engine assets are tens of megabytes and are read once per engine start, so the cache is
/// bounded by entry count rather than bytes; keep `max_entries` small.
pub struct CachedStore<S> {
    inner: S,
    cache: Mutex<Inner>,
}

impl<S: KvStore> CachedStore<S> {
    pub fn new(inner: S, max_entries: usize) -> Result<Self> {
        let max_entries = NonZeroUsize::new(max_entries)
            .ok_or(StorageError::InvalidConfig("max_entries must be > 0"))?;
        Ok(Self {
            inner,
            cache: Mutex::new(Inner {
                lru: LruCache::new(max_entries),
                stats: CachedStoreStats::default(),
            }),
        })
    }

    pub fn stats(&self) -> CachedStoreStats {
        self.lock().stats
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<S: KvStore> KvStore for CachedStore<S> {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let cache_key = (namespace.to_string(), key.to_string());
        {
            let mut guard = self.lock();
            let hit = guard.lru.get(&cache_key).cloned();
            if let Some(value) = hit {
                guard.stats.hits += 1;
                return Ok(Some(value));
            }
            guard.stats.misses += 1;
        }

        let value = self.inner.get(namespace, key).await?;
        if let Some(value) = &value {
            self.lock().lru.put(cache_key, value.clone());
        }
        Ok(value)
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let cache_key = (namespace.to_string(), key.to_string());
        // Drop the stale entry first so a failed write cannot leave it behind.
        self.lock().lru.pop(&cache_key);
        self.inner.put(namespace, key, value).await?;
        self.lock().lru.put(cache_key, value.to_vec());
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        {
            let mut guard = self.lock();
            let stale: Vec<_> = guard
                .lru
                .iter()
                .filter(|((ns, _), _)| ns == namespace)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &stale {
                guard.lru.pop(k);
            }
            guard.stats.invalidations += stale.len() as u64;
        }
        self.inner.delete_namespace(namespace).await
    }
}
