use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;

use crate::{KvStore, Result, StorageError};

/// Filesystem-backed [`KvStore`].
///
/// Layout: `<root>/<namespace>/<key>`, with both components percent-encoded so path-like keys
/// map to a single flat file. Values are written to a sibling temp file and renamed into place,
/// so readers observe either the old or the new value.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        Ok(self.root.join(encode_component(namespace)?))
    }

    fn key_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        Ok(self.namespace_dir(namespace)?.join(encode_component(key)?))
    }
}

#[async_trait::async_trait]
impl KvStore for FsStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(namespace, key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        let path = dir.join(encode_component(key)?);
        fs::create_dir_all(&dir).await?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".tmp-{}-{n}", std::process::id()));
        if let Err(err) = fs::write(&tmp, value).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(namespace, "deleted namespace");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Percent-encodes everything except ASCII alphanumerics, `-` and `_`.
///
/// Encoding `.` keeps `.`/`..` and the store's own `.tmp-*` files out of the key space.
fn encode_component(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(StorageError::InvalidKey(raw.to_string()));
    }
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    Ok(out)
}
