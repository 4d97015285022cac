//! Host/worker bridge for the secondary WASM module.
//!
//! The host side ([`WorkerBridge`]) tracks every worker's readiness and the functions its
//! module exports, issues correlated calls with unique increasing call ids, enforces call
//! timeouts and fans commands out to all workers. The worker side ([`WorkerRuntime`]) owns the
//! module through a [`ModuleBridge`], drives the engine's pthread bootstrap through a
//! [`ThreadRuntime`], and answers every inbound command via the [`MessageRouter`].
//!
//! All traffic is JSON envelopes (see `spx-protocol`) over [`WorkerPort`]s; [`spawn_worker`]
//! wires an in-process worker over tokio channels.

#![forbid(unsafe_code)]

mod error;
mod host;
mod module;
mod port;
mod router;
mod thread;
mod timeouts;
mod worker;

pub use crate::error::{BridgeError, ModuleError, PostError, ThreadError};
pub use crate::host::{BridgeConfig, BroadcastReport, WorkerBridge, WorkerInfo, WorkerNotice};
pub use crate::module::{
    LoadedModule, ModuleBridge, ModuleBridgeConfig, ModuleHost, ModuleLoader, INIT_FUNCTION,
};
pub use crate::port::{ChannelPort, WorkerPort};
pub use crate::router::{callback_handler, Dispatch, MessageRouter, CALLBACK_PREFIX, LOAD_DATA_FUNCTION};
pub use crate::thread::ThreadRuntime;
pub use crate::worker::{spawn_worker, SpawnedWorker, WorkerRuntime};

pub use spx_protocol::ModuleState;
