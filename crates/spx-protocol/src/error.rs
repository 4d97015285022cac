use crate::CallId;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    #[error("unknown command {cmd:?}")]
    UnknownCommand { cmd: String, call_id: Option<CallId> },

    #[error("invalid payload for {cmd:?}: {source}")]
    InvalidPayload {
        cmd: String,
        call_id: Option<CallId>,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Call id of the offending message, when it could be recovered.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            ProtocolError::UnknownCommand { call_id, .. }
            | ProtocolError::InvalidPayload { call_id, .. } => *call_id,
            ProtocolError::Malformed(_) | ProtocolError::Encode(_) => None,
        }
    }

    /// The `cmd` tag of the offending message, if it had one.
    pub fn cmd(&self) -> Option<&str> {
        match self {
            ProtocolError::UnknownCommand { cmd, .. }
            | ProtocolError::InvalidPayload { cmd, .. } => Some(cmd),
            ProtocolError::Malformed(_) | ProtocolError::Encode(_) => None,
        }
    }
}
