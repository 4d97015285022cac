use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use spx_storage::KvStore;

use crate::{content_hash, CacheError, CacheLayout, EngineHashes, Fetcher, Result};

/// Where engine assets come from and whether they are cached at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOptions {
    /// When false every asset request goes to the network.
    pub use_asset_cache: bool,
    /// Asset served by [`CacheManager::check_engine_cache`].
    pub engine_asset: String,
    /// Asset id -> URL.
    pub asset_urls: HashMap<String, String>,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            use_asset_cache: true,
            engine_asset: "godot.editor.wasm".to_string(),
            asset_urls: HashMap::new(),
        }
    }
}

impl AssetOptions {
    pub fn with_url(mut self, asset: impl Into<String>, url: impl Into<String>) -> Self {
        self.asset_urls.insert(asset.into(), url.into());
        self
    }
}

/// Compares content hashes against persisted ones and refreshes stale entries.
///
/// The manager does not coordinate concurrent writers; callers serialize through the host
/// controller's queue.
pub struct CacheManager {
    store: Arc<dyn KvStore>,
    fetcher: Arc<dyn Fetcher>,
    layout: CacheLayout,
    options: AssetOptions,
    current_project_hash: Mutex<String>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("layout", &self.layout)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        fetcher: Arc<dyn Fetcher>,
        layout: CacheLayout,
        options: AssetOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            layout,
            options,
            current_project_hash: Mutex::new(String::new()),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn options(&self) -> &AssetOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn hash_slot(&self) -> MutexGuard<'_, String> {
        self.current_project_hash
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    /// Hash computed by the most recent [`CacheManager::check_and_update`].
    pub fn current_project_hash(&self) -> String {
        self.hash_slot().clone()
    }

    /// Returns `true` when `data` matches the persisted project hash.
    ///
    /// On a mismatch with `clear_if_dirty` the whole namespace is destroyed first, then the
    /// payload and its hash are written. Without it the new hash is recorded before the payload
    /// as a pending marker, and reset to `""` if the payload write fails.
    pub async fn check_and_update(&self, data: &[u8], clear_if_dirty: bool) -> Result<bool> {
        let hash = content_hash(data);
        *self.hash_slot() = hash.clone();

        let ns = self.layout.namespace();
        let hash_key = self.layout.project_hash_key();
        let data_key = self.layout.project_data_key();

        let cached = self
            .store
            .get_string(ns, &hash_key)
            .await
            .inspect_err(|err| tracing::error!(key = %hash_key, "reading project hash failed: {err}"))?;
        if cached.as_deref() == Some(hash.as_str()) {
            tracing::debug!(%hash, "project cache hit");
            return Ok(true);
        }
        tracing::debug!(
            cached = cached.as_deref().unwrap_or("<none>"),
            %hash,
            clear_if_dirty,
            "project cache miss"
        );

        if clear_if_dirty {
            self.clear_persistence(ns).await?;
            self.store
                .put(ns, &data_key, data)
                .await
                .inspect_err(|err| tracing::error!(key = %data_key, "writing project data failed: {err}"))?;
            self.store
                .put_string(ns, &hash_key, &hash)
                .await
                .inspect_err(|err| tracing::error!(key = %hash_key, "writing project hash failed: {err}"))?;
            return Ok(false);
        }

        self.store
            .put_string(ns, &hash_key, &hash)
            .await
            .inspect_err(|err| tracing::error!(key = %hash_key, "writing pending hash failed: {err}"))?;
        if let Err(err) = self.store.put(ns, &data_key, data).await {
            tracing::error!(key = %data_key, "writing project data failed: {err}");
            if let Err(reset) = self.store.put_string(ns, &hash_key, "").await {
                tracing::warn!(key = %hash_key, "resetting pending hash failed: {reset}");
            }
            return Err(err.into());
        }
        Ok(false)
    }

    /// Persists `hash` as the installed project's hash.
    pub async fn update_project_hash(&self, hash: &str) -> Result<()> {
        let key = self.layout.project_hash_key();
        self.store
            .put_string(self.layout.namespace(), &key, hash)
            .await
            .inspect_err(|err| tracing::error!(%key, "writing project hash failed: {err}"))?;
        Ok(())
    }

    /// Persists the hash computed by the last [`CacheManager::check_and_update`].
    pub async fn commit_project_hash(&self) -> Result<()> {
        let hash = self.current_project_hash();
        self.update_project_hash(&hash).await
    }

    /// Destroys everything stored under `namespace`.
    pub async fn clear_persistence(&self, namespace: &str) -> Result<()> {
        self.store
            .delete_namespace(namespace)
            .await
            .inspect_err(|err| tracing::error!(namespace, "clearing persistence failed: {err}"))?;
        tracing::debug!(namespace, "persistence cleared");
        Ok(())
    }

    fn asset_url(&self, asset_id: &str) -> Result<&str> {
        self.options
            .asset_urls
            .get(asset_id)
            .map(String::as_str)
            .ok_or_else(|| CacheError::UnknownAsset(asset_id.to_string()))
    }

    /// Downloads `asset_id` without consulting the cache.
    pub async fn fetch_asset(&self, asset_id: &str) -> Result<Vec<u8>> {
        let url = self.asset_url(asset_id)?;
        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .inspect_err(|err| tracing::error!(asset = asset_id, "fetch failed: {err}"))?;
        Ok(bytes)
    }

    /// Returns the bytes of `asset_id`, from storage when the stored hash equals `hash`.
    pub async fn check_cache_asset(&self, hash: &str, asset_id: &str) -> Result<Vec<u8>> {
        if !self.options.use_asset_cache {
            return self.fetch_asset(asset_id).await;
        }
        // Fail on an unconfigured asset before touching storage.
        self.asset_url(asset_id)?;

        let ns = self.layout.namespace();
        let hash_key = self.layout.engine_hash_key(asset_id);
        let data_key = self.layout.engine_data_key(asset_id);

        let cached = self
            .store
            .get_string(ns, &hash_key)
            .await
            .inspect_err(|err| tracing::error!(key = %hash_key, "reading asset hash failed: {err}"))?;
        if cached.as_deref() == Some(hash) {
            let stored = self
                .store
                .get(ns, &data_key)
                .await
                .inspect_err(|err| tracing::error!(key = %data_key, "reading asset failed: {err}"))?;
            match stored {
                Some(bytes) => {
                    tracing::debug!(asset = asset_id, bytes = bytes.len(), "asset cache hit");
                    return Ok(bytes);
                }
                None => tracing::warn!(asset = asset_id, "asset hash present without data"),
            }
        }

        let bytes = self.fetch_asset(asset_id).await?;
        self.store
            .put(ns, &data_key, &bytes)
            .await
            .inspect_err(|err| tracing::error!(key = %data_key, "writing asset failed: {err}"))?;
        self.store
            .put_string(ns, &hash_key, hash)
            .await
            .inspect_err(|err| tracing::error!(key = %hash_key, "writing asset hash failed: {err}"))?;
        tracing::debug!(asset = asset_id, bytes = bytes.len(), "asset cache refreshed");
        Ok(bytes)
    }

    /// Loads the configured engine asset using its known-good hash.
    pub async fn check_engine_cache(&self, hashes: &EngineHashes) -> Result<Vec<u8>> {
        let asset = self.options.engine_asset.as_str();
        let hash = hashes
            .get(asset)
            .ok_or_else(|| CacheError::MissingHash(asset.to_string()))?;
        self.check_cache_asset(hash, asset).await
    }
}
