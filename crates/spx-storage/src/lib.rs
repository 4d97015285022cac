//! Persisted key-value storage for engine assets and cache hashes.
//!
//! Values live under a *namespace* (an IndexedDB database in the browser, a directory on
//! native hosts) and are addressed by deterministic path-like keys such as
//! `/home/web_user/.spx_cache_hash/Game`. A value is always replaced as a whole; there are no
//! partial writes.
//!
//! Backends:
//! - [`MemoryStore`]: process-local, used by tests and ephemeral hosts.
//! - [`FsStore`] (native): one directory per namespace, atomic file replacement.
//! - [`IndexedDbStore`] (wasm32): the browser's IndexedDB, object store `FILE_DATA`.
//!
//! [`CachedStore`] adds an in-memory LRU in front of any backend.

#![forbid(unsafe_code)]

mod cache;
mod error;
mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod fs;
#[cfg(target_arch = "wasm32")]
mod indexeddb;

pub use crate::cache::{CachedStore, CachedStoreStats};
pub use crate::error::{Result, StorageError};
pub use crate::memory::MemoryStore;

#[cfg(not(target_arch = "wasm32"))]
pub use crate::fs::FsStore;
#[cfg(target_arch = "wasm32")]
pub use crate::indexeddb::IndexedDbStore;

/// Object store name used for all engine and cache data.
pub const FILE_DATA_STORE: &str = "FILE_DATA";

/// Thread-safety requirements of a store on the current target.
///
/// Browser handles are `!Send`; native stores are shared across tokio tasks.
#[cfg(not(target_arch = "wasm32"))]
pub trait StoreBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> StoreBounds for T {}

#[cfg(target_arch = "wasm32")]
pub trait StoreBounds {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> StoreBounds for T {}

/// Minimal async key-value interface over persisted storage.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait KvStore: StoreBounds {
    /// Returns `None` when the key (or the whole namespace) does not exist.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Destroys every key in `namespace`. Deleting a missing namespace succeeds.
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;

    async fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match self.get(namespace, key).await? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: "value is not UTF-8",
                }),
        }
    }

    async fn put_string(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.put(namespace, key, value.as_bytes()).await
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(namespace, key, value).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        (**self).delete_namespace(namespace).await
    }
}
