use serde_json::Value;
use tokio::sync::mpsc;

use crate::PostError;

/// Sending half of a cross-context channel (`postMessage`).
///
/// Posting is synchronous and never waits for the receiver; a failure means the message was
/// not accepted at all.
pub trait WorkerPort: Send + Sync {
    fn post(&self, message: Value) -> Result<(), PostError>;
}

/// In-process port backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPort {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelPort {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// A connected port plus the receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl WorkerPort for ChannelPort {
    fn post(&self, message: Value) -> Result<(), PostError> {
        self.tx
            .send(message)
            .map_err(|_| PostError("channel closed".to_string()))
    }
}
