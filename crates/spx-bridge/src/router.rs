use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use spx_protocol::{
    decode_command, now_ms, peek_call_id, CallId, Envelope, Message, ProtocolError, WorkerCommand,
    WorkerEvent, WorkerId,
};

use crate::thread::ThreadBinding;
use crate::{ModuleBridge, ThreadRuntime};

/// Module function that receives project data.
pub const LOAD_DATA_FUNCTION: &str = "goLoadData";

/// Prefix of the page-side callback answering a `customCall`.
pub const CALLBACK_PREFIX: &str = "_spxCb";

/// What the worker loop should do with a routed message.
pub enum Dispatch {
    Done,
    /// Post these now.
    Reply(Vec<Envelope<WorkerEvent>>),
    /// Post the output whenever the future completes; the loop keeps routing meanwhile.
    Deferred(BoxFuture<'static, Vec<Envelope<WorkerEvent>>>),
    /// Stop the worker loop.
    Stop,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Done => f.write_str("Done"),
            Dispatch::Reply(replies) => f.debug_tuple("Reply").field(replies).finish(),
            Dispatch::Deferred(_) => f.write_str("Deferred(..)"),
            Dispatch::Stop => f.write_str("Stop"),
        }
    }
}

struct Context {
    worker_id: AtomicU32,
    module: Arc<ModuleBridge>,
    thread: Mutex<ThreadBinding>,
    project_data: Mutex<Option<Vec<u8>>>,
}

/// Routes each inbound command to exactly one handler.
///
/// Unknown or malformed commands are answered with `unknownCommand` / `error` replies that echo
/// the caller's `_callId`.
pub struct MessageRouter {
    ctx: Arc<Context>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("worker_id", &self.worker_id())
            .field("module", &self.ctx.module)
            .finish_non_exhaustive()
    }
}

fn reply(call_id: Option<CallId>, body: WorkerEvent) -> Envelope<WorkerEvent> {
    Envelope {
        body,
        call_id,
        target_worker: None,
        timestamp: now_ms(),
    }
}

/// `setAIInteractionAPIEndpoint` is answered through `_spxCbSetAIInteractionAPIEndpoint`.
pub fn callback_handler(func: &str) -> String {
    let mut chars = func.chars();
    match chars.next() {
        Some(first) => format!("{CALLBACK_PREFIX}{}{}", first.to_uppercase(), chars.as_str()),
        None => CALLBACK_PREFIX.to_string(),
    }
}

impl MessageRouter {
    pub fn new(
        worker_id: WorkerId,
        module: Arc<ModuleBridge>,
        thread: Option<Box<dyn ThreadRuntime>>,
    ) -> Self {
        Self {
            ctx: Arc::new(Context {
                worker_id: AtomicU32::new(worker_id),
                module,
                thread: Mutex::new(ThreadBinding::new(thread)),
                project_data: Mutex::new(None),
            }),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.ctx.worker_id.load(Ordering::Relaxed)
    }

    pub fn module(&self) -> &Arc<ModuleBridge> {
        &self.ctx.module
    }

    /// Last project data received through `projectDataUpdate`.
    pub fn project_data(&self) -> Option<Vec<u8>> {
        lock(&self.ctx.project_data).clone()
    }

    pub fn dispatch(&self, message: Value) -> Dispatch {
        let call_id = peek_call_id(&message);
        match decode_command(message) {
            Ok(envelope) => self.route(envelope),
            Err(ProtocolError::UnknownCommand { cmd, call_id }) => {
                tracing::warn!(worker = self.worker_id(), %cmd, "unknown command");
                Dispatch::Reply(vec![reply(
                    call_id,
                    WorkerEvent::UnknownCommand { original_cmd: cmd },
                )])
            }
            Err(err) => {
                tracing::warn!(worker = self.worker_id(), "rejecting message: {err}");
                Dispatch::Reply(vec![reply(
                    call_id,
                    WorkerEvent::Error {
                        error: err.to_string(),
                        original_cmd: err.cmd().map(str::to_string),
                    },
                )])
            }
        }
    }

    fn route(&self, envelope: Envelope<WorkerCommand>) -> Dispatch {
        let cmd = envelope.tag();
        let call_id = envelope.call_id;
        let worker_id = self.worker_id();
        let ctx = &self.ctx;
        tracing::debug!(worker = worker_id, cmd, ?call_id, "routing");

        let failed = |error: String| {
            Dispatch::Reply(vec![reply(
                call_id,
                WorkerEvent::Error {
                    error,
                    original_cmd: Some(cmd.to_string()),
                },
            )])
        };

        match envelope.body {
            WorkerCommand::Load {
                worker_id,
                handlers,
            } => {
                ctx.worker_id.store(worker_id, Ordering::Relaxed);
                let error = lock(&ctx.thread)
                    .load(worker_id, &handlers)
                    .err()
                    .map(|err| err.to_string());
                Dispatch::Reply(vec![reply(call_id, WorkerEvent::Loaded { error })])
            }
            WorkerCommand::Run {
                pthread_ptr,
                start_routine,
                arg,
            } => match lock(&ctx.thread).run(pthread_ptr, start_routine, arg) {
                Ok(()) => Dispatch::Done,
                Err(err) => {
                    tracing::error!(worker = worker_id, pthread_ptr, "thread entry failed: {err}");
                    failed(err.to_string())
                }
            },
            WorkerCommand::Cancel => {
                lock(&ctx.thread).cancel();
                Dispatch::Done
            }
            WorkerCommand::CheckMailbox => {
                lock(&ctx.thread).check_mailbox();
                Dispatch::Done
            }
            WorkerCommand::ProjectDataUpdate { data } => {
                tracing::debug!(worker = worker_id, bytes = data.len(), "project data update");
                *lock(&ctx.project_data) = Some(data.clone());
                if !ctx.module.is_ready() {
                    // Loaded once the module reports ready.
                    return Dispatch::Done;
                }
                let module = ctx.module.clone();
                Dispatch::Deferred(
                    async move {
                        load_project_data(&module, data).await;
                        Vec::new()
                    }
                    .boxed(),
                )
            }
            WorkerCommand::CustomCommand { custom_cmd, .. } => {
                let result = format!(
                    "custom command {} processed",
                    custom_cmd.as_deref().unwrap_or("unknown")
                );
                Dispatch::Reply(vec![reply(
                    call_id,
                    WorkerEvent::CustomCommandComplete { worker_id, result },
                )])
            }
            WorkerCommand::CustomCall { func_name, args } => {
                let module = ctx.module.clone();
                Dispatch::Deferred(
                    async move {
                        let body = match module.invoke(&func_name, args).await {
                            Ok(result) => WorkerEvent::CallHandler {
                                handler: callback_handler(&func_name),
                                args: vec![if result.is_null() {
                                    Value::String(String::new())
                                } else {
                                    result
                                }],
                            },
                            Err(err) => {
                                tracing::warn!(func = %func_name, "custom call failed: {err}");
                                WorkerEvent::Error {
                                    error: err.to_string(),
                                    original_cmd: Some(cmd.to_string()),
                                }
                            }
                        };
                        vec![reply(call_id, body)]
                    }
                    .boxed(),
                )
            }
            WorkerCommand::Ping => {
                Dispatch::Reply(vec![reply(call_id, WorkerEvent::Pong { worker_id })])
            }
            WorkerCommand::GetWorkerStatus => {
                let (pthread_ptr, initialized_js) = {
                    let thread = lock(&ctx.thread);
                    (thread.pthread_ptr, thread.initialized_js)
                };
                Dispatch::Reply(vec![reply(
                    call_id,
                    WorkerEvent::WorkerStatus {
                        worker_id,
                        pthread_ptr,
                        initialized_js,
                        module_state: ctx.module.state(),
                    },
                )])
            }
            WorkerCommand::InitModule => {
                let ctx = ctx.clone();
                Dispatch::Deferred(
                    async move {
                        match ctx.module.init().await {
                            Ok(functions) => {
                                let pending = lock(&ctx.project_data).clone();
                                if let Some(data) = pending {
                                    load_project_data(&ctx.module, data).await;
                                }
                                vec![
                                    Envelope::new(WorkerEvent::ModuleReady {
                                        available_functions: functions,
                                    }),
                                    reply(
                                        call_id,
                                        WorkerEvent::ModuleInitResult {
                                            success: true,
                                            error: None,
                                        },
                                    ),
                                ]
                            }
                            Err(err) => vec![reply(
                                call_id,
                                WorkerEvent::ModuleInitResult {
                                    success: false,
                                    error: Some(err.to_string()),
                                },
                            )],
                        }
                    }
                    .boxed(),
                )
            }
            WorkerCommand::CallFunction { func_name, args } => {
                let module = ctx.module.clone();
                Dispatch::Deferred(
                    async move {
                        let body = match module.invoke(&func_name, args).await {
                            Ok(result) => WorkerEvent::FunctionResult {
                                success: true,
                                result,
                                error: None,
                            },
                            Err(err) => WorkerEvent::FunctionResult {
                                success: false,
                                result: Value::Null,
                                error: Some(err.to_string()),
                            },
                        };
                        vec![reply(call_id, body)]
                    }
                    .boxed(),
                )
            }
            WorkerCommand::Shutdown => {
                ctx.module.destroy();
                lock(&ctx.thread).cancel();
                Dispatch::Stop
            }
        }
    }
}

async fn load_project_data(module: &ModuleBridge, data: Vec<u8>) {
    if let Err(err) = module.invoke(LOAD_DATA_FUNCTION, vec![Value::from(data)]).await {
        tracing::warn!("loading project data failed: {err}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
