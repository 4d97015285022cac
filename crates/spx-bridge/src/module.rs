use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use spx_protocol::ModuleState;
use tokio::sync::{oneshot, watch};

use crate::timeouts::bounded;
use crate::ModuleError;

/// Optional export run once after the handshake, before any queued call.
pub const INIT_FUNCTION: &str = "goWasmInit";

/// An instantiated secondary module.
#[async_trait::async_trait]
pub trait ModuleHost: Send + Sync {
    async fn invoke(&self, func: &str, args: Vec<Value>) -> Result<Value, ModuleError>;
}

/// Fetches and instantiates the secondary module.
#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self) -> Result<LoadedModule, ModuleError>;
}

/// A module that has been instantiated but may not have finished starting up.
pub struct LoadedModule {
    pub host: Arc<dyn ModuleHost>,
    /// Resolves with the exported function names once the module signals readiness.
    pub ready: oneshot::Receiver<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBridgeConfig {
    /// Covers instantiation plus the readiness handshake.
    pub load_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
}

impl Default for ModuleBridgeConfig {
    fn default() -> Self {
        Self {
            load_timeout: Some(Duration::from_secs(15)),
            call_timeout: Some(Duration::from_secs(10)),
        }
    }
}

type Reply = oneshot::Sender<Result<Value, ModuleError>>;

struct QueuedCall {
    func: String,
    args: Vec<Value>,
    reply: Reply,
}

enum Route {
    Run(Arc<dyn ModuleHost>, Vec<Value>),
    Queued(oneshot::Receiver<Result<Value, ModuleError>>),
}

struct Inner {
    host: Option<Arc<dyn ModuleHost>>,
    functions: Vec<String>,
    queue: VecDeque<QueuedCall>,
}

/// Worker-side owner of the secondary module.
///
/// Calls made before the module is ready are queued and run in submission order once it
/// reports ready. Queued calls fail if loading fails or the module is destroyed, and later
/// calls fail immediately.
pub struct ModuleBridge {
    loader: Arc<dyn ModuleLoader>,
    config: ModuleBridgeConfig,
    state: watch::Sender<ModuleState>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ModuleBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleBridge")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModuleBridge {
    pub fn new(loader: Arc<dyn ModuleLoader>, config: ModuleBridgeConfig) -> Self {
        let (state, _) = watch::channel(ModuleState::Unloaded);
        Self {
            loader,
            config,
            state,
            inner: Mutex::new(Inner {
                host: None,
                functions: Vec::new(),
                queue: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn state(&self) -> ModuleState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ModuleState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ModuleState::Ready
    }

    pub fn functions(&self) -> Vec<String> {
        self.lock().functions.clone()
    }

    /// Loads the module and waits for its handshake. Returns the exported functions.
    ///
    /// A ready module is not reloaded and a concurrent caller joins the load in progress. A
    /// failed module may be retried.
    pub async fn init(&self) -> Result<Vec<String>, ModuleError> {
        let in_progress = {
            let inner = self.lock();
            match self.state() {
                ModuleState::Ready => return Ok(inner.functions.clone()),
                ModuleState::Loading => Some(self.state.subscribe()),
                ModuleState::Destroyed => {
                    return Err(ModuleError::Unavailable(ModuleState::Destroyed))
                }
                ModuleState::Unloaded | ModuleState::Error => {
                    self.state.send_replace(ModuleState::Loading);
                    None
                }
            }
        };
        if let Some(state_rx) = in_progress {
            return self.join_load(state_rx).await;
        }

        let startup = async {
            let loaded = self.loader.load().await?;
            let functions = loaded.ready.await.map_err(|_| ModuleError::Handshake)?;
            Ok::<_, ModuleError>((loaded.host, functions))
        };
        let outcome = match bounded(self.config.load_timeout, startup).await {
            Some(outcome) => outcome,
            None => Err(ModuleError::Timeout {
                what: "module load".to_string(),
                after: self.config.load_timeout.unwrap_or_default(),
            }),
        };

        match outcome {
            Ok((host, functions)) => {
                if functions.iter().any(|name| name == INIT_FUNCTION) {
                    if let Err(err) = self.run_call(&host, INIT_FUNCTION, Vec::new()).await {
                        tracing::warn!("{INIT_FUNCTION} failed, continuing: {err}");
                    }
                }
                let queued = {
                    let mut inner = self.lock();
                    if self.state() == ModuleState::Destroyed {
                        return Err(ModuleError::Unavailable(ModuleState::Destroyed));
                    }
                    inner.host = Some(host.clone());
                    inner.functions = functions.clone();
                    self.state.send_replace(ModuleState::Ready);
                    std::mem::take(&mut inner.queue)
                };
                tracing::debug!(
                    functions = functions.len(),
                    queued = queued.len(),
                    "module ready"
                );
                for call in queued {
                    let result = self.run_call(&host, &call.func, call.args).await;
                    let _ = call.reply.send(result);
                }
                Ok(functions)
            }
            Err(err) => {
                tracing::error!("module initialization failed: {err}");
                let queued = {
                    let mut inner = self.lock();
                    if self.state() != ModuleState::Destroyed {
                        self.state.send_replace(ModuleState::Error);
                    }
                    std::mem::take(&mut inner.queue)
                };
                for call in queued {
                    let _ = call.reply.send(Err(err.clone()));
                }
                Err(err)
            }
        }
    }

    /// Waits for a load started by someone else.
    async fn join_load(
        &self,
        mut state_rx: watch::Receiver<ModuleState>,
    ) -> Result<Vec<String>, ModuleError> {
        loop {
            let current = *state_rx.borrow_and_update();
            match current {
                ModuleState::Ready => return Ok(self.functions()),
                ModuleState::Unloaded | ModuleState::Loading => {}
                state => return Err(ModuleError::Unavailable(state)),
            }
            if state_rx.changed().await.is_err() {
                return Err(ModuleError::Unavailable(ModuleState::Destroyed));
            }
        }
    }

    /// Invokes an exported function, queueing until the module is ready.
    pub async fn invoke(&self, func: &str, args: Vec<Value>) -> Result<Value, ModuleError> {
        let route = {
            let mut inner = self.lock();
            match self.state() {
                ModuleState::Ready => match inner.host.clone() {
                    Some(host) => Route::Run(host, args),
                    None => return Err(ModuleError::NotInitialized),
                },
                ModuleState::Unloaded | ModuleState::Loading => {
                    let (reply, rx) = oneshot::channel();
                    inner.queue.push_back(QueuedCall {
                        func: func.to_string(),
                        args,
                        reply,
                    });
                    Route::Queued(rx)
                }
                state => return Err(ModuleError::Unavailable(state)),
            }
        };
        match route {
            Route::Run(host, args) => self.run_call(&host, func, args).await,
            Route::Queued(rx) => rx
                .await
                .unwrap_or(Err(ModuleError::Unavailable(ModuleState::Destroyed))),
        }
    }

    async fn run_call(
        &self,
        host: &Arc<dyn ModuleHost>,
        func: &str,
        args: Vec<Value>,
    ) -> Result<Value, ModuleError> {
        let limit = self.config.call_timeout;
        let value = bounded(limit, host.invoke(func, args))
            .await
            .ok_or_else(|| ModuleError::Timeout {
                what: func.to_string(),
                after: limit.unwrap_or_default(),
            })??;
        // Exported functions report failure as `{ error: "..." }`.
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(ModuleError::Call(message));
        }
        Ok(value)
    }

    /// Drops the module. Queued calls and all later calls fail.
    pub fn destroy(&self) {
        let queued = {
            let mut inner = self.lock();
            self.state.send_replace(ModuleState::Destroyed);
            inner.host = None;
            inner.functions.clear();
            std::mem::take(&mut inner.queue)
        };
        for call in queued {
            let _ = call
                .reply
                .send(Err(ModuleError::Unavailable(ModuleState::Destroyed)));
        }
    }
}
