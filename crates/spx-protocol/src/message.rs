use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Message, WorkerId};

/// Commands delivered to a worker.
///
/// The first four variants belong to the engine's pthread bootstrap and are forwarded verbatim
/// to the engine runtime; the remaining ones are answered by the worker's own router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum WorkerCommand {
    /// Parse and load the engine code in this worker. Answered with [`WorkerEvent::Loaded`].
    #[serde(rename_all = "camelCase")]
    Load {
        #[serde(rename = "workerID")]
        worker_id: WorkerId,
        #[serde(default)]
        handlers: Vec<String>,
    },

    /// Bind this worker to a pthread and enter its start routine.
    #[serde(rename_all = "camelCase")]
    Run {
        #[serde(rename = "pthread_ptr")]
        pthread_ptr: u64,
        #[serde(rename = "start_routine")]
        start_routine: u64,
        arg: u64,
    },

    /// `pthread_cancel()` on the bound thread.
    Cancel,

    CheckMailbox,

    #[serde(rename_all = "camelCase")]
    ProjectDataUpdate { data: Vec<u8> },

    #[serde(rename_all = "camelCase")]
    CustomCommand {
        #[serde(default)]
        custom_cmd: Option<String>,
        #[serde(default)]
        payload: Value,
    },

    /// Invoke a module function and answer through a page-side callback handler.
    #[serde(rename_all = "camelCase")]
    CustomCall {
        func_name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    Ping,

    GetWorkerStatus,

    /// Load the secondary module in this worker.
    #[serde(rename = "initGoWasm")]
    InitModule,

    #[serde(rename = "callGoFunction", rename_all = "camelCase")]
    CallFunction {
        func_name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    Shutdown,
}

impl Message for WorkerCommand {
    const TAGS: &'static [&'static str] = &[
        "load",
        "run",
        "cancel",
        "checkMailbox",
        "projectDataUpdate",
        "customCommand",
        "customCall",
        "ping",
        "getWorkerStatus",
        "initGoWasm",
        "callGoFunction",
        "shutdown",
    ];

    fn tag(&self) -> &'static str {
        match self {
            WorkerCommand::Load { .. } => "load",
            WorkerCommand::Run { .. } => "run",
            WorkerCommand::Cancel => "cancel",
            WorkerCommand::CheckMailbox => "checkMailbox",
            WorkerCommand::ProjectDataUpdate { .. } => "projectDataUpdate",
            WorkerCommand::CustomCommand { .. } => "customCommand",
            WorkerCommand::CustomCall { .. } => "customCall",
            WorkerCommand::Ping => "ping",
            WorkerCommand::GetWorkerStatus => "getWorkerStatus",
            WorkerCommand::InitModule => "initGoWasm",
            WorkerCommand::CallFunction { .. } => "callGoFunction",
            WorkerCommand::Shutdown => "shutdown",
        }
    }
}

/// Lifecycle of the secondary module inside one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loading,
    Ready,
    Error,
    Destroyed,
}

impl ModuleState {
    /// Terminal states reject calls instead of queueing them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Error | ModuleState::Destroyed)
    }
}

/// Events a worker posts back to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum WorkerEvent {
    Loaded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Handshake from the secondary module: it is running and exports these functions.
    #[serde(rename = "goModuleReady", rename_all = "camelCase")]
    ModuleReady { available_functions: Vec<String> },

    #[serde(rename = "goFunctionResult")]
    FunctionResult {
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Pong {
        #[serde(rename = "workerID")]
        worker_id: WorkerId,
    },

    #[serde(rename_all = "camelCase")]
    WorkerStatus {
        #[serde(rename = "workerID")]
        worker_id: WorkerId,
        #[serde(rename = "pthread_ptr")]
        pthread_ptr: u64,
        #[serde(rename = "initializedJS")]
        initialized_js: bool,
        module_state: ModuleState,
    },

    #[serde(rename = "goWasmInitResult")]
    ModuleInitResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    CustomCommandComplete {
        #[serde(rename = "workerID")]
        worker_id: WorkerId,
        result: String,
    },

    /// Invoke a page-side handler registered at load time.
    CallHandler {
        handler: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    #[serde(rename_all = "camelCase")]
    UnknownCommand { original_cmd: String },

    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_cmd: Option<String>,
    },

    /// The worker (or its module) failed and should no longer receive calls.
    WorkerError { error: String },
}

impl Message for WorkerEvent {
    const TAGS: &'static [&'static str] = &[
        "loaded",
        "goModuleReady",
        "goFunctionResult",
        "pong",
        "workerStatus",
        "goWasmInitResult",
        "customCommandComplete",
        "callHandler",
        "unknownCommand",
        "error",
        "workerError",
    ];

    fn tag(&self) -> &'static str {
        match self {
            WorkerEvent::Loaded { .. } => "loaded",
            WorkerEvent::ModuleReady { .. } => "goModuleReady",
            WorkerEvent::FunctionResult { .. } => "goFunctionResult",
            WorkerEvent::Pong { .. } => "pong",
            WorkerEvent::WorkerStatus { .. } => "workerStatus",
            WorkerEvent::ModuleInitResult { .. } => "goWasmInitResult",
            WorkerEvent::CustomCommandComplete { .. } => "customCommandComplete",
            WorkerEvent::CallHandler { .. } => "callHandler",
            WorkerEvent::UnknownCommand { .. } => "unknownCommand",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::WorkerError { .. } => "workerError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_commands() -> Vec<WorkerCommand> {
        vec![
            WorkerCommand::Load {
                worker_id: 1,
                handlers: vec!["onPrint".into()],
            },
            WorkerCommand::Run {
                pthread_ptr: 0x1000,
                start_routine: 12,
                arg: 0,
            },
            WorkerCommand::Cancel,
            WorkerCommand::CheckMailbox,
            WorkerCommand::ProjectDataUpdate { data: vec![1, 2] },
            WorkerCommand::CustomCommand {
                custom_cmd: Some("reload".into()),
                payload: Value::Null,
            },
            WorkerCommand::CustomCall {
                func_name: "setAIInteractionAPIEndpoint".into(),
                args: vec![json!("https://example.invalid")],
            },
            WorkerCommand::Ping,
            WorkerCommand::GetWorkerStatus,
            WorkerCommand::InitModule,
            WorkerCommand::CallFunction {
                func_name: "goLoadData".into(),
                args: vec![],
            },
            WorkerCommand::Shutdown,
        ]
    }

    fn sample_events() -> Vec<WorkerEvent> {
        vec![
            WorkerEvent::Loaded { error: None },
            WorkerEvent::ModuleReady {
                available_functions: vec!["goWasmInit".into()],
            },
            WorkerEvent::FunctionResult {
                success: true,
                result: json!(3),
                error: None,
            },
            WorkerEvent::Pong { worker_id: 1 },
            WorkerEvent::WorkerStatus {
                worker_id: 1,
                pthread_ptr: 0,
                initialized_js: false,
                module_state: ModuleState::Loading,
            },
            WorkerEvent::ModuleInitResult {
                success: false,
                error: Some("boom".into()),
            },
            WorkerEvent::CustomCommandComplete {
                worker_id: 1,
                result: "ok".into(),
            },
            WorkerEvent::CallHandler {
                handler: "_spxCbX".into(),
                args: vec![],
            },
            WorkerEvent::UnknownCommand {
                original_cmd: "nope".into(),
            },
            WorkerEvent::Error {
                error: "bad".into(),
                original_cmd: None,
            },
            WorkerEvent::WorkerError { error: "dead".into() },
        ]
    }

    #[test]
    fn tag_table_matches_serde_tags() {
        let commands = sample_commands();
        assert_eq!(commands.len(), WorkerCommand::TAGS.len());
        for cmd in commands {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["cmd"], cmd.tag());
            assert!(WorkerCommand::TAGS.contains(&cmd.tag()));
        }

        let events = sample_events();
        assert_eq!(events.len(), WorkerEvent::TAGS.len());
        for evt in events {
            let value = serde_json::to_value(&evt).unwrap();
            assert_eq!(value["cmd"], evt.tag());
            assert!(WorkerEvent::TAGS.contains(&evt.tag()));
        }
    }

    #[test]
    fn engine_bootstrap_fields_use_engine_names() {
        let value = serde_json::to_value(WorkerCommand::Run {
            pthread_ptr: 64,
            start_routine: 5,
            arg: 9,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "cmd": "run", "pthread_ptr": 64, "start_routine": 5, "arg": 9 })
        );

        let value = serde_json::to_value(WorkerCommand::Load {
            worker_id: 4,
            handlers: vec![],
        })
        .unwrap();
        assert_eq!(value["workerID"], 4);
    }

    #[test]
    fn function_result_accepts_missing_result() {
        let evt: WorkerEvent =
            serde_json::from_value(json!({ "cmd": "goFunctionResult", "success": false, "error": "x" }))
                .unwrap();
        assert_eq!(
            evt,
            WorkerEvent::FunctionResult {
                success: false,
                result: Value::Null,
                error: Some("x".into()),
            }
        );
    }

    #[test]
    fn module_state_terminality() {
        assert!(!ModuleState::Unloaded.is_terminal());
        assert!(!ModuleState::Loading.is_terminal());
        assert!(!ModuleState::Ready.is_terminal());
        assert!(ModuleState::Error.is_terminal());
        assert!(ModuleState::Destroyed.is_terminal());
    }
}
