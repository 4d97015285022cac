use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use spx_protocol::{decode_event, CallId, Envelope, Message, ModuleState, WorkerCommand, WorkerEvent};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::timeouts::bounded;
use crate::{BridgeError, WorkerPort};

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Measured from the moment a call is posted to its worker. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How long a call may wait for its worker's module to become ready.
    pub ready_timeout: Option<Duration>,
    /// Buffered uncorrelated events per subscriber.
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(10)),
            ready_timeout: Some(Duration::from_secs(30)),
            event_capacity: 256,
        }
    }
}

/// Snapshot of one attached worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub index: usize,
    pub state: ModuleState,
    pub functions: Vec<String>,
    pub running: bool,
}

/// Outcome of posting one message to many workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub success: usize,
    pub failure: usize,
    pub total: usize,
}

/// An event that did not answer a pending call.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerNotice {
    pub index: usize,
    pub event: WorkerEvent,
}

struct WorkerRecord {
    port: Arc<dyn WorkerPort>,
    state: watch::Sender<ModuleState>,
    functions: Vec<String>,
    running: bool,
    pump: Option<JoinHandle<()>>,
}

impl WorkerRecord {
    fn state(&self) -> ModuleState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ModuleState) {
        self.state.send_replace(state);
    }
}

struct PendingCall {
    worker: usize,
    reply: oneshot::Sender<Result<WorkerEvent>>,
}

#[derive(Default)]
struct BridgeState {
    destroyed: bool,
    next_index: usize,
    workers: BTreeMap<usize, WorkerRecord>,
    pending: HashMap<CallId, PendingCall>,
}

impl BridgeState {
    fn reject_worker_calls(&mut self, index: usize, mut error: impl FnMut() -> BridgeError) {
        let ids: Vec<CallId> = self
            .pending
            .iter()
            .filter(|(_, call)| call.worker == index)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(call) = self.pending.remove(&id) {
                let _ = call.reply.send(Err(error()));
            }
        }
    }
}

struct Shared {
    config: BridgeConfig,
    next_call_id: AtomicU64,
    state: Mutex<BridgeState>,
    notices: broadcast::Sender<WorkerNotice>,
}

/// Host-side view of every worker: readiness, advertised functions and in-flight calls.
///
/// Cloning yields another handle to the same bridge.
#[derive(Clone)]
pub struct WorkerBridge {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("WorkerBridge")
            .field("destroyed", &state.destroyed)
            .field("workers", &state.workers.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl Default for WorkerBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl WorkerBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (notices, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                next_call_id: AtomicU64::new(0),
                state: Mutex::new(BridgeState::default()),
                notices,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    /// Registers a worker in `Loading` and returns its index. Indices are never reused.
    pub fn attach(&self, port: Arc<dyn WorkerPort>) -> Result<usize> {
        let mut state = self.lock();
        if state.destroyed {
            return Err(BridgeError::Destroyed);
        }
        let index = state.next_index;
        state.next_index += 1;
        let (tx, _) = watch::channel(ModuleState::Loading);
        state.workers.insert(
            index,
            WorkerRecord {
                port,
                state: tx,
                functions: Vec::new(),
                running: false,
                pump: None,
            },
        );
        tracing::debug!(index, "worker attached");
        Ok(index)
    }

    /// Attaches a worker and feeds everything it posts back into [`WorkerBridge::handle_event`].
    pub fn attach_channel(
        &self,
        port: Arc<dyn WorkerPort>,
        events: mpsc::UnboundedReceiver<Value>,
    ) -> Result<usize> {
        let index = self.attach(port)?;
        let pump = tokio::spawn(pump_weak(Arc::downgrade(&self.shared), index, events));
        match self.lock().workers.get_mut(&index) {
            Some(record) => record.pump = Some(pump),
            None => pump.abort(),
        }
        Ok(index)
    }

    /// Forgets a worker. Its pending calls fail with [`BridgeError::Detached`].
    pub fn detach(&self, index: usize) -> bool {
        let mut state = self.lock();
        let Some(record) = state.workers.remove(&index) else {
            return false;
        };
        record.set_state(ModuleState::Destroyed);
        if let Some(pump) = &record.pump {
            pump.abort();
        }
        state.reject_worker_calls(index, || BridgeError::Detached(index));
        tracing::debug!(index, "worker detached");
        true
    }

    /// Marks whether the worker is currently bound to an engine thread.
    pub fn set_running(&self, index: usize, running: bool) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .workers
            .get_mut(&index)
            .ok_or(BridgeError::UnknownWorker(index))?;
        record.running = running;
        Ok(())
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.lock()
            .workers
            .iter()
            .map(|(index, record)| WorkerInfo {
                index: *index,
                state: record.state(),
                functions: record.functions.clone(),
                running: record.running,
            })
            .collect()
    }

    pub fn worker(&self, index: usize) -> Option<WorkerInfo> {
        self.workers().into_iter().find(|info| info.index == index)
    }

    pub fn pending_calls(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Events that were not replies to a call: readiness, `pong`s from broadcasts and the like.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotice> {
        self.shared.notices.subscribe()
    }

    /// Processes one message posted by worker `index`.
    pub fn handle_event(&self, index: usize, message: Value) {
        let envelope = match decode_event(message) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(index, "undecodable worker message: {err}");
                if let Some(call_id) = err.call_id() {
                    if let Some(call) = self.lock().pending.remove(&call_id) {
                        let _ = call.reply.send(Err(err.into()));
                    }
                }
                return;
            }
        };

        let mut state = self.lock();
        let mut failure = None;
        match state.workers.get_mut(&index) {
            Some(record) => match &envelope.body {
                WorkerEvent::Loaded { error: Some(error) } => failure = Some(error.clone()),
                WorkerEvent::ModuleReady {
                    available_functions,
                } if !record.state().is_terminal() => {
                    record.functions = available_functions.clone();
                    record.set_state(ModuleState::Ready);
                    tracing::debug!(index, functions = available_functions.len(), "worker ready");
                }
                WorkerEvent::ModuleInitResult {
                    success: false,
                    error,
                } => {
                    failure = Some(
                        error
                            .clone()
                            .unwrap_or_else(|| "module initialization failed".to_string()),
                    )
                }
                WorkerEvent::WorkerError { error } => failure = Some(error.clone()),
                _ => {}
            },
            None => tracing::debug!(index, cmd = envelope.tag(), "event from unknown worker"),
        }

        if let Some(call_id) = envelope.call_id {
            match state.pending.remove(&call_id) {
                Some(call) => {
                    let _ = call.reply.send(Ok(envelope.body.clone()));
                }
                None => tracing::debug!(index, call_id, "dropping reply for unknown or expired call"),
            }
        }

        if let Some(error) = failure {
            tracing::warn!(index, "worker failed: {error}");
            if let Some(record) = state.workers.get(&index) {
                record.set_state(ModuleState::Error);
            }
            state.reject_worker_calls(index, || BridgeError::WorkerFailed {
                index,
                error: error.clone(),
            });
        }
        drop(state);

        if envelope.call_id.is_none() {
            let _ = self.shared.notices.send(WorkerNotice {
                index,
                event: envelope.body,
            });
        }
    }

    /// Feeds every message from `events` into [`WorkerBridge::handle_event`] until the channel
    /// closes.
    pub async fn pump(&self, index: usize, mut events: mpsc::UnboundedReceiver<Value>) {
        while let Some(message) = events.recv().await {
            self.handle_event(index, message);
        }
    }

    fn dispatch(
        &self,
        index: usize,
        command: WorkerCommand,
    ) -> Result<(CallId, oneshot::Receiver<Result<WorkerEvent>>)> {
        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message = Envelope::new(command).with_call_id(call_id).to_value()?;
        let (tx, rx) = oneshot::channel();

        let port = {
            let mut state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            let record = state
                .workers
                .get(&index)
                .ok_or(BridgeError::UnknownWorker(index))?;
            let worker_state = record.state();
            if worker_state.is_terminal() {
                return Err(BridgeError::WorkerUnavailable {
                    index,
                    state: worker_state,
                });
            }
            let port = record.port.clone();
            state.pending.insert(
                call_id,
                PendingCall {
                    worker: index,
                    reply: tx,
                },
            );
            port
        };

        if let Err(source) = port.post(message) {
            self.lock().pending.remove(&call_id);
            return Err(BridgeError::Post { index, source });
        }
        Ok((call_id, rx))
    }

    async fn await_reply(
        &self,
        call_id: CallId,
        reply: oneshot::Receiver<Result<WorkerEvent>>,
    ) -> Result<WorkerEvent> {
        let limit = self.shared.config.call_timeout;
        let settled = match bounded(limit, reply).await {
            Some(Ok(settled)) => settled,
            Some(Err(_)) => return Err(BridgeError::Destroyed),
            None => {
                self.lock().pending.remove(&call_id);
                let after = limit.unwrap_or_default();
                tracing::warn!(call_id, ?after, "call timed out");
                return Err(BridgeError::Timeout { call_id, after });
            }
        };
        match settled? {
            WorkerEvent::Error { error, .. } => Err(BridgeError::Remote(error)),
            WorkerEvent::UnknownCommand { original_cmd } => {
                Err(BridgeError::UnknownCommand(original_cmd))
            }
            event => Ok(event),
        }
    }

    /// Posts a correlated command and waits for the reply carrying the same call id.
    pub async fn request(&self, index: usize, command: WorkerCommand) -> Result<WorkerEvent> {
        let (call_id, reply) = self.dispatch(index, command)?;
        self.await_reply(call_id, reply).await
    }

    /// Resolves once worker `index` reports its module ready.
    pub async fn wait_ready(&self, index: usize) -> Result<()> {
        let mut state_rx = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            state
                .workers
                .get(&index)
                .ok_or(BridgeError::UnknownWorker(index))?
                .state
                .subscribe()
        };

        let wait = async {
            loop {
                let current = *state_rx.borrow_and_update();
                if current == ModuleState::Ready {
                    return Ok(());
                }
                if current.is_terminal() {
                    if self.is_destroyed() {
                        return Err(BridgeError::Destroyed);
                    }
                    return Err(BridgeError::WorkerUnavailable {
                        index,
                        state: current,
                    });
                }
                if state_rx.changed().await.is_err() {
                    return Err(BridgeError::Detached(index));
                }
            }
        };

        let limit = self.shared.config.ready_timeout;
        bounded(limit, wait).await.unwrap_or_else(|| {
            Err(BridgeError::NotReady {
                index,
                after: limit.unwrap_or_default(),
            })
        })
    }

    /// Calls an exported module function on worker `index`, waiting for readiness first.
    pub async fn call(&self, index: usize, func: &str, args: Vec<Value>) -> Result<Value> {
        self.wait_ready(index).await?;
        let command = WorkerCommand::CallFunction {
            func_name: func.to_string(),
            args,
        };
        match self.request(index, command).await? {
            WorkerEvent::FunctionResult {
                success: true,
                result,
                ..
            } => Ok(result),
            WorkerEvent::FunctionResult { error, .. } => Err(BridgeError::Remote(
                error.unwrap_or_else(|| format!("{func} failed")),
            )),
            other => Err(BridgeError::UnexpectedReply(other.tag())),
        }
    }

    /// Calls `func` on the first ready worker that exports it, else on the first worker still
    /// loading.
    pub async fn call_any(&self, func: &str, args: Vec<Value>) -> Result<Value> {
        let index = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            let ready = state.workers.iter().find(|(_, record)| {
                record.state() == ModuleState::Ready && record.functions.iter().any(|f| f == func)
            });
            ready
                .or_else(|| {
                    state.workers.iter().find(|(_, record)| {
                        matches!(record.state(), ModuleState::Unloaded | ModuleState::Loading)
                    })
                })
                .map(|(index, _)| *index)
                .ok_or_else(|| BridgeError::NoWorker(func.to_string()))?
        };
        self.call(index, func, args).await
    }

    /// Issues every call concurrently; results keep the input order.
    pub async fn call_batch(&self, calls: Vec<(String, Vec<Value>)>) -> Vec<Result<Value>> {
        join_all(
            calls
                .into_iter()
                .map(|(func, args)| async move { self.call_any(&func, args).await }),
        )
        .await
    }

    /// Posts `command` to every worker (only thread-bound ones when `only_running`).
    ///
    /// A worker refusing the message does not stop delivery to the others.
    pub fn broadcast(&self, command: WorkerCommand, only_running: bool) -> Result<BroadcastReport> {
        let targets: Vec<(usize, Arc<dyn WorkerPort>)> = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            state
                .workers
                .iter()
                .filter(|(_, record)| !only_running || record.running)
                .map(|(index, record)| (*index, record.port.clone()))
                .collect()
        };
        self.deliver(command, targets, 0)
    }

    /// Posts `command` to the listed workers that are attached and thread-bound.
    ///
    /// Listed workers that are gone or not running count as failures.
    pub fn broadcast_to(&self, indices: &[usize], command: WorkerCommand) -> Result<BroadcastReport> {
        let (targets, missing) = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            let mut targets = Vec::with_capacity(indices.len());
            let mut missing = 0;
            for index in indices {
                match state.workers.get(index) {
                    Some(record) if record.running => targets.push((*index, record.port.clone())),
                    _ => {
                        missing += 1;
                        tracing::warn!(index, cmd = command.tag(), "broadcast target not running");
                    }
                }
            }
            (targets, missing)
        };
        self.deliver(command, targets, missing)
    }

    fn deliver(
        &self,
        command: WorkerCommand,
        targets: Vec<(usize, Arc<dyn WorkerPort>)>,
        missing: usize,
    ) -> Result<BroadcastReport> {
        let mut report = BroadcastReport {
            total: targets.len() + missing,
            failure: missing,
            ..BroadcastReport::default()
        };
        for (index, port) in targets {
            let message = Envelope::new(command.clone())
                .with_target_worker(index)
                .to_value()?;
            match port.post(message) {
                Ok(()) => report.success += 1,
                Err(err) => {
                    report.failure += 1;
                    tracing::warn!(index, cmd = command.tag(), "broadcast delivery failed: {err}");
                }
            }
        }
        tracing::debug!(
            cmd = command.tag(),
            success = report.success,
            failure = report.failure,
            "broadcast"
        );
        Ok(report)
    }

    /// Posts an uncorrelated command to one worker.
    pub fn post_to_worker(
        &self,
        index: usize,
        command: WorkerCommand,
        only_running: bool,
    ) -> Result<()> {
        let port = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            let record = state
                .workers
                .get(&index)
                .ok_or(BridgeError::UnknownWorker(index))?;
            if only_running && !record.running {
                return Err(BridgeError::NotRunning(index));
            }
            record.port.clone()
        };
        let message = Envelope::new(command).with_target_worker(index).to_value()?;
        port.post(message)
            .map_err(|source| BridgeError::Post { index, source })
    }

    async fn request_all(
        &self,
        command: WorkerCommand,
    ) -> Result<Vec<(usize, Result<WorkerEvent>)>> {
        let indices: Vec<usize> = {
            let state = self.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            state.workers.keys().copied().collect()
        };
        let replies = join_all(indices.iter().map(|index| self.request(*index, command.clone()))).await;
        Ok(indices.into_iter().zip(replies).collect())
    }

    /// `ping` every worker; each entry holds its `pong` or the failure.
    pub async fn ping_all(&self) -> Result<Vec<(usize, Result<WorkerEvent>)>> {
        self.request_all(WorkerCommand::Ping).await
    }

    pub async fn request_all_status(&self) -> Result<Vec<(usize, Result<WorkerEvent>)>> {
        self.request_all(WorkerCommand::GetWorkerStatus).await
    }

    /// Asks every worker to load its secondary module. Readiness arrives as events.
    pub fn init_module_in_all(&self) -> Result<BroadcastReport> {
        self.broadcast(WorkerCommand::InitModule, false)
    }

    pub fn broadcast_project_data(&self, data: Vec<u8>) -> Result<BroadcastReport> {
        self.broadcast(WorkerCommand::ProjectDataUpdate { data }, true)
    }

    /// Sends project data to one engine instance's workers only.
    pub fn send_project_data(&self, indices: &[usize], data: Vec<u8>) -> Result<BroadcastReport> {
        self.broadcast_to(indices, WorkerCommand::ProjectDataUpdate { data })
    }

    pub fn send_custom_command(&self, custom_cmd: &str, payload: Value) -> Result<BroadcastReport> {
        self.broadcast(
            WorkerCommand::CustomCommand {
                custom_cmd: Some(custom_cmd.to_string()),
                payload,
            },
            true,
        )
    }

    /// Rejects every pending and waiting call, tells each worker to shut down and refuses all
    /// later calls.
    pub fn destroy(&self) {
        let (workers, pending) = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            (
                std::mem::take(&mut state.workers),
                std::mem::take(&mut state.pending),
            )
        };

        for call in pending.into_values() {
            let _ = call.reply.send(Err(BridgeError::Destroyed));
        }
        for (index, record) in workers {
            record.set_state(ModuleState::Destroyed);
            match Envelope::new(WorkerCommand::Shutdown).to_value() {
                Ok(message) => {
                    if let Err(err) = record.port.post(message) {
                        tracing::debug!(index, "shutdown not delivered: {err}");
                    }
                }
                Err(err) => tracing::warn!("encoding shutdown failed: {err}"),
            }
            if let Some(pump) = record.pump {
                pump.abort();
            }
        }
        tracing::info!("worker bridge destroyed");
    }
}

async fn pump_weak(shared: Weak<Shared>, index: usize, mut events: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        WorkerBridge { shared }.handle_event(index, message);
    }
    tracing::debug!(index, "worker channel closed");
}
