//! Page-side controller for the editor and game engine instances.
//!
//! [`HostController`] runs every lifecycle operation on a single task so that starting the
//! editor, running the game and stopping either never interleave. Engines are supplied through
//! [`EngineFactory`]; the controller only sequences them, validates cached installs through
//! `spx-cache` and hands the game's workers to a [`spx_bridge::WorkerBridge`].

#![forbid(unsafe_code)]

mod config;
mod controller;
mod engine;
mod error;
mod merge;

pub use crate::config::HostConfig;
pub use crate::controller::{HostController, HostDeps, HostStatus, ProgressFn, Result};
pub use crate::engine::{Engine, EngineFactory, EngineKind, EngineWorker, ExitSignal, ExitWaiter};
pub use crate::error::{EngineError, HostError};
pub use crate::merge::{merge_zips, MergeError};
