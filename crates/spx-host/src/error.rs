use spx_bridge::BridgeError;
use spx_cache::CacheError;

/// Failure reported by an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine failed to initialize: {0}")]
    Init(String),

    #[error("engine failed to start: {0}")]
    Start(String),

    #[error("engine filesystem error: {0}")]
    Filesystem(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("no project data has been provided")]
    MissingProjectData,

    /// The controller stopped before the operation ran.
    #[error("host controller has shut down")]
    Closed,
}
