//! Host/worker message protocol.
//!
//! Every message crossing a context boundary is a JSON object carrying a `cmd` tag plus the
//! envelope fields `_callId` (correlated requests only), `_targetWorkerIndex` (broadcasts) and
//! `_timestamp`. Field names are the wire contract shared with the page-side glue and must not
//! change.
//!
//! Both directions are closed enums: [`WorkerCommand`] (host → worker) and [`WorkerEvent`]
//! (worker → host). Decoding distinguishes a message that has no usable `cmd` at all
//! ([`ProtocolError::Malformed`]) from a well-formed message whose tag is not part of the enum
//! ([`ProtocolError::UnknownCommand`]); the latter keeps the call id so the receiver can still
//! answer it.

#![forbid(unsafe_code)]

mod error;
mod message;

pub use crate::error::ProtocolError;
pub use crate::message::{ModuleState, WorkerCommand, WorkerEvent};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Correlates a request with its reply.
pub type CallId = u64;

/// Engine-assigned worker identifier (`workerID`).
pub type WorkerId = u32;

pub const CMD_FIELD: &str = "cmd";
pub const CALL_ID_FIELD: &str = "_callId";
pub const TARGET_WORKER_FIELD: &str = "_targetWorkerIndex";
pub const TIMESTAMP_FIELD: &str = "_timestamp";

/// A message body type with a closed set of `cmd` tags.
pub trait Message: Serialize + DeserializeOwned {
    /// Every tag the body type can decode.
    const TAGS: &'static [&'static str];

    /// The tag this value is encoded with.
    fn tag(&self) -> &'static str;
}

/// A message body plus the envelope fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub body: T,
    pub call_id: Option<CallId>,
    pub target_worker: Option<usize>,
    pub timestamp: u64,
}

impl<T: Message> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            body,
            call_id: None,
            target_worker: None,
            timestamp: now_ms(),
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_target_worker(mut self, index: usize) -> Self {
        self.target_worker = Some(index);
        self
    }

    /// Build a reply that echoes `request`'s call id.
    pub fn reply_to<U>(request: &Envelope<U>, body: T) -> Self {
        Self {
            body,
            call_id: request.call_id,
            target_worker: None,
            timestamp: now_ms(),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.body.tag()
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(&self.body).map_err(ProtocolError::Encode)?;
        let Value::Object(map) = &mut value else {
            return Err(ProtocolError::Malformed("message body is not an object"));
        };
        if let Some(call_id) = self.call_id {
            map.insert(CALL_ID_FIELD.to_string(), Value::from(call_id));
        }
        if let Some(index) = self.target_worker {
            map.insert(TARGET_WORKER_FIELD.to_string(), Value::from(index as u64));
        }
        map.insert(TIMESTAMP_FIELD.to_string(), Value::from(self.timestamp));
        Ok(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::Malformed("message is not an object"));
        };

        let call_id = take_u64(&mut map, CALL_ID_FIELD)?;
        let target_worker = take_u64(&mut map, TARGET_WORKER_FIELD)?.map(|v| v as usize);
        let timestamp = take_u64(&mut map, TIMESTAMP_FIELD)?.unwrap_or(0);

        let cmd = match map.get(CMD_FIELD) {
            Some(Value::String(cmd)) => cmd.clone(),
            Some(_) => return Err(ProtocolError::Malformed("cmd is not a string")),
            None => return Err(ProtocolError::Malformed("missing cmd")),
        };
        if !T::TAGS.contains(&cmd.as_str()) {
            return Err(ProtocolError::UnknownCommand { cmd, call_id });
        }

        let body = serde_json::from_value(Value::Object(map)).map_err(|source| {
            ProtocolError::InvalidPayload {
                cmd,
                call_id,
                source,
            }
        })?;

        Ok(Self {
            body,
            call_id,
            target_worker,
            timestamp,
        })
    }
}

pub fn decode_command(value: Value) -> Result<Envelope<WorkerCommand>> {
    Envelope::from_value(value)
}

pub fn decode_event(value: Value) -> Result<Envelope<WorkerEvent>> {
    Envelope::from_value(value)
}

/// Best-effort extraction of the call id from a message that failed to decode.
pub fn peek_call_id(value: &Value) -> Option<CallId> {
    value.get(CALL_ID_FIELD).and_then(Value::as_u64)
}

fn take_u64(map: &mut Map<String, Value>, field: &'static str) -> Result<Option<u64>> {
    match map.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or(ProtocolError::Malformed(field)),
    }
}

/// Milliseconds since the unix epoch.
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds since the unix epoch.
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_fields_are_flattened_next_to_cmd() {
        let env = Envelope::new(WorkerCommand::Ping)
            .with_call_id(7)
            .with_target_worker(2);
        let value = env.to_value().unwrap();
        assert_eq!(value["cmd"], "ping");
        assert_eq!(value["_callId"], 7);
        assert_eq!(value["_targetWorkerIndex"], 2);
        assert!(value["_timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn reply_echoes_call_id() {
        let req = Envelope::new(WorkerCommand::GetWorkerStatus).with_call_id(41);
        let reply = Envelope::reply_to(&req, WorkerEvent::Pong { worker_id: 3 });
        assert_eq!(reply.call_id, Some(41));
        assert_eq!(reply.target_worker, None);
    }

    #[test]
    fn unknown_tag_keeps_call_id() {
        let err = decode_command(json!({ "cmd": "teleport", "_callId": 9, "_timestamp": 1 }))
            .unwrap_err();
        match err {
            ProtocolError::UnknownCommand { cmd, call_id } => {
                assert_eq!(cmd, "teleport");
                assert_eq!(call_id, Some(9));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_cmd_is_malformed() {
        let err = decode_event(json!({ "_callId": 1 })).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(err.call_id(), None);

        let err = decode_event(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn known_tag_with_bad_payload_is_invalid_payload() {
        let err = decode_command(json!({ "cmd": "callGoFunction", "_callId": 3 })).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
        assert_eq!(err.call_id(), Some(3));
    }

    #[test]
    fn bad_call_id_type_is_malformed() {
        let err = decode_command(json!({ "cmd": "ping", "_callId": "x" })).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed("_callId")));
    }

    #[test]
    fn missing_timestamp_decodes_as_zero() {
        let env = decode_command(json!({ "cmd": "cancel" })).unwrap();
        assert_eq!(env.body, WorkerCommand::Cancel);
        assert_eq!(env.timestamp, 0);
        assert_eq!(env.call_id, None);
    }

    #[test]
    fn peek_call_id_reads_raw_messages() {
        assert_eq!(peek_call_id(&json!({ "_callId": 5 })), Some(5));
        assert_eq!(peek_call_id(&json!({ "cmd": "x" })), None);
    }
}
