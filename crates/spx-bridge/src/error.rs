use std::time::Duration;

use spx_protocol::{CallId, ModuleState, ProtocolError};

/// A worker refused (or could not receive) a posted message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PostError(pub String);

/// Host-side bridge failures.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge has been destroyed")]
    Destroyed,

    #[error("no worker at index {0}")]
    UnknownWorker(usize),

    #[error("worker {index} is {state:?}")]
    WorkerUnavailable { index: usize, state: ModuleState },

    #[error("worker {index} failed: {error}")]
    WorkerFailed { index: usize, error: String },

    #[error("worker {0} was detached")]
    Detached(usize),

    #[error("worker {0} is not running a thread")]
    NotRunning(usize),

    #[error("no worker can serve {0:?}")]
    NoWorker(String),

    #[error("failed to post to worker {index}: {source}")]
    Post {
        index: usize,
        #[source]
        source: PostError,
    },

    #[error("call {call_id} timed out after {after:?}")]
    Timeout { call_id: CallId, after: Duration },

    #[error("worker {index} not ready after {after:?}")]
    NotReady { index: usize, after: Duration },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("worker does not understand {0:?}")]
    UnknownCommand(String),

    #[error("unexpected reply {0:?}")]
    UnexpectedReply(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Failures of the secondary module inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("module has not been initialized")]
    NotInitialized,

    #[error("module is {0:?}")]
    Unavailable(ModuleState),

    #[error("module failed to load: {0}")]
    Load(String),

    #[error("module exited before signalling readiness")]
    Handshake,

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("module does not export {0:?}")]
    MissingFunction(String),

    #[error("{0}")]
    Call(String),
}

/// Failures raised by the engine's thread runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    /// The entry point unwound the stack to return to the event loop. Not a failure.
    #[error("unwind")]
    Unwind,

    #[error("no engine runtime in this worker")]
    NoRuntime,

    #[error("engine load failed: {0}")]
    Load(String),

    #[error("{0}")]
    Fault(String),
}
