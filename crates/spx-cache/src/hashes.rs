use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Known-good hashes of the engine assets shipped with a build, keyed by asset file name.
///
/// Serialized as a flat JSON object: `{ "godot.editor.wasm": "4789…" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineHashes(BTreeMap<String, String>);

impl EngineHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn insert(&mut self, asset: impl Into<String>, hash: impl Into<String>) {
        self.0.insert(asset.into(), hash.into());
    }

    /// Hash `data` and record it for `asset`.
    pub fn insert_data(&mut self, asset: impl Into<String>, data: &[u8]) {
        self.insert(asset, content_hash(data));
    }

    pub fn get(&self, asset: &str) -> Option<&str> {
        self.0.get(asset).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
