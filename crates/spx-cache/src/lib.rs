//! Hash-validated caching of project bundles and engine assets.
//!
//! Two flows share one persisted namespace (the engine's persistent path):
//! - [`CacheManager::check_and_update`] hashes a project bundle and compares it with the hash
//!   recorded by the previous install, so an unchanged bundle skips the reinstall.
//! - [`CacheManager::check_cache_asset`] serves engine assets (the engine `.wasm` and friends)
//!   from storage when their known-good hash matches, and downloads them otherwise.

#![forbid(unsafe_code)]

mod error;
mod fetch;
mod hashes;
mod layout;
mod manager;

pub use crate::error::{CacheError, FetchError, Result};
pub use crate::fetch::Fetcher;
pub use crate::hashes::{content_hash, EngineHashes};
pub use crate::layout::CacheLayout;
pub use crate::manager::{AssetOptions, CacheManager};

#[cfg(not(target_arch = "wasm32"))]
pub use crate::fetch::HttpFetcher;
#[cfg(target_arch = "wasm32")]
pub use crate::fetch::BrowserFetcher;
