//! Web host for the spx game engine.
//!
//! The workspace is split by concern and re-exported here:
//! - [`protocol`]: JSON envelopes exchanged between the page and its workers.
//! - [`storage`]: namespaced key-value persistence (memory, filesystem, IndexedDB).
//! - [`cache`]: hash-validated caching of project bundles and engine assets.
//! - [`bridge`]: the host/worker bridge around the secondary WASM module.
//! - [`host`]: the controller that sequences editor and game engine instances.

#![forbid(unsafe_code)]

pub use spx_bridge as bridge;
pub use spx_cache as cache;
pub use spx_host as host;
pub use spx_protocol as protocol;
pub use spx_storage as storage;

pub use spx_bridge::{WorkerBridge, WorkerRuntime};
pub use spx_cache::{CacheManager, EngineHashes};
pub use spx_host::{HostConfig, HostController, HostDeps, HostError, HostStatus};
