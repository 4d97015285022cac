use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{KvStore, Result};

type Namespaces = HashMap<String, HashMap<String, Vec<u8>>>;

/// Process-local [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Namespaces> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.lock().contains_key(namespace)
    }

    /// Number of keys stored under `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.lock().get(namespace).map_or(0, HashMap::len)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.lock().remove(namespace);
        Ok(())
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.put("a", "k", b"1").await.unwrap();
        store.put("b", "k", b"2").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(store.get("b", "k").await.unwrap().as_deref(), Some(&b"2"[..]));

        store.delete_namespace("a").await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), None);
        assert_eq!(store.len("b"), 1);
        assert!(!store.contains_namespace("a"));

        // Deleting twice is not an error.
        store.delete_namespace("a").await.unwrap();
    }

    #[tokio::test]
    async fn string_helpers_round_trip_and_reject_binary() {
        let store = MemoryStore::new();
        store.put_string("ns", "hash", "abc123").await.unwrap();
        assert_eq!(
            store.get_string("ns", "hash").await.unwrap().as_deref(),
            Some("abc123")
        );

        store.put("ns", "blob", &[0xff, 0xfe]).await.unwrap();
        let err = store.get_string("ns", "blob").await.unwrap_err();
        assert!(matches!(err, crate::StorageError::Corrupt { .. }));
    }
}
