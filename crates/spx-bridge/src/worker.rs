use std::sync::Arc;

use serde_json::Value;
use spx_protocol::{Envelope, WorkerEvent, WorkerId};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::{
    BridgeError, ChannelPort, Dispatch, MessageRouter, ModuleBridge, ModuleBridgeConfig,
    ModuleLoader, ThreadRuntime, WorkerBridge, WorkerPort,
};

/// One worker's sequential message loop.
pub struct WorkerRuntime {
    router: MessageRouter,
    outbound: Arc<dyn WorkerPort>,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl WorkerRuntime {
    pub fn new(router: MessageRouter, outbound: Arc<dyn WorkerPort>) -> Self {
        Self { router, outbound }
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Routes messages until `inbound` closes or a `shutdown` arrives.
    ///
    /// Deferred work (module loading, function calls) runs beside the loop so later messages
    /// are still routed while it is in flight.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Value>) {
        let worker = self.router.worker_id();
        let mut deferred = JoinSet::new();
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    match self.router.dispatch(message) {
                        Dispatch::Done => {}
                        Dispatch::Reply(replies) => post_all(self.outbound.as_ref(), replies),
                        Dispatch::Deferred(work) => {
                            let outbound = self.outbound.clone();
                            deferred.spawn(async move {
                                let replies = work.await;
                                post_all(outbound.as_ref(), replies);
                            });
                        }
                        Dispatch::Stop => break,
                    }
                }
                Some(joined) = deferred.join_next(), if !deferred.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(worker, "worker task panicked");
                        }
                    }
                }
            }
        }
        tracing::debug!(worker, in_flight = deferred.len(), "worker loop stopped");
    }
}

fn post_all(port: &dyn WorkerPort, replies: Vec<Envelope<WorkerEvent>>) {
    for reply in replies {
        match reply.to_value() {
            Ok(message) => {
                if let Err(err) = port.post(message) {
                    tracing::debug!("reply not delivered: {err}");
                }
            }
            Err(err) => tracing::warn!("encoding reply failed: {err}"),
        }
    }
}

/// An in-process worker running on its own tokio task.
#[derive(Debug)]
pub struct SpawnedWorker {
    /// Host → worker.
    pub port: ChannelPort,
    /// Worker → host.
    pub events: mpsc::UnboundedReceiver<Value>,
    pub task: JoinHandle<()>,
}

impl SpawnedWorker {
    /// Registers the worker with `bridge`, which then consumes its events.
    pub fn attach(self, bridge: &WorkerBridge) -> Result<(usize, JoinHandle<()>), BridgeError> {
        let index = bridge.attach_channel(Arc::new(self.port), self.events)?;
        Ok((index, self.task))
    }
}

/// Starts a worker whose secondary module comes from `loader`.
///
/// `thread` carries the engine's pthread bootstrap when the worker hosts engine threads.
pub fn spawn_worker(
    worker_id: WorkerId,
    loader: Arc<dyn ModuleLoader>,
    thread: Option<Box<dyn ThreadRuntime>>,
    config: ModuleBridgeConfig,
) -> SpawnedWorker {
    let (port, inbound) = ChannelPort::pair();
    let (to_host, events) = ChannelPort::pair();
    let module = Arc::new(ModuleBridge::new(loader, config));
    let router = MessageRouter::new(worker_id, module, thread);
    let runtime = WorkerRuntime::new(router, Arc::new(to_host));
    let task = tokio::spawn(runtime.run(inbound));
    SpawnedWorker { port, events, task }
}
