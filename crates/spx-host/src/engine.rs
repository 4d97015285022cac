use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use spx_bridge::WorkerPort;
use tokio::sync::{mpsc, watch};

use crate::EngineError;

/// Which build of the engine to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// The editor, also used for the install pass.
    Editor,
    Game,
}

/// A pthread worker spawned by an engine instance.
pub struct EngineWorker {
    pub port: Arc<dyn WorkerPort>,
    /// Everything the worker posts back to the page.
    pub events: mpsc::UnboundedReceiver<Value>,
    /// Whether the worker is already bound to an engine thread.
    pub running: bool,
}

impl std::fmt::Debug for EngineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineWorker")
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

/// One engine instance. The engine itself is a black box; the controller only sequences it.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    async fn init(&self) -> Result<(), EngineError>;

    /// Starts the main loop with command-line style arguments.
    async fn start(&self, args: &[String]) -> Result<(), EngineError>;

    /// Asks the engine to quit. Completion is reported through the [`ExitSignal`].
    fn request_quit(&self);

    /// Writes a file into the engine's virtual filesystem.
    fn copy_to_fs(&self, path: &str, data: &[u8]) -> Result<(), EngineError>;

    /// Places the project data (and, in runtime mode, the pack) under `dir`.
    async fn unpack_game_data(
        &self,
        dir: &str,
        project_data_name: &str,
        project_data: &[u8],
        pack_name: &str,
        pack_data: Option<&[u8]>,
    ) -> Result<(), EngineError>;

    /// Resolves once the virtual filesystem has been flushed to persistent storage.
    async fn wait_fs_sync(&self) -> Result<(), EngineError>;

    /// Hands over the workers spawned since the previous call.
    fn worker_ports(&self) -> Vec<EngineWorker>;
}

/// Creates engine instances.
pub trait EngineFactory: Send + Sync {
    /// `wasm` is the engine binary served by the engine cache, when one was loaded.
    fn create(
        &self,
        kind: EngineKind,
        wasm: Option<Arc<[u8]>>,
        exit: ExitSignal,
    ) -> Result<Box<dyn Engine>, EngineError>;
}

/// Lets an engine report that its main loop has ended. The first exit code wins.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<Option<i32>>>,
}

impl ExitSignal {
    pub fn new() -> (Self, ExitWaiter) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Arc::new(tx) }, ExitWaiter { rx })
    }

    pub fn exit(&self, code: i32) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(code);
            true
        });
    }

    pub fn has_exited(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Controller side of an [`ExitSignal`].
#[derive(Debug, Clone)]
pub struct ExitWaiter {
    rx: watch::Receiver<Option<i32>>,
}

impl ExitWaiter {
    /// Resolves with the exit code. `None` means the engine was dropped without reporting one.
    pub async fn wait(&mut self) -> Option<i32> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        }
    }

    /// Like [`ExitWaiter::wait`] but gives up after `limit`; the outer `None` means it timed out.
    pub async fn wait_for(&mut self, limit: Option<Duration>) -> Option<Option<i32>> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.wait()).await.ok(),
            None => Some(self.wait().await),
        }
    }

    pub fn code(&self) -> Option<i32> {
        *self.rx.borrow()
    }
}
