//! Wire frames
//!
//! One JSON object per frame. The core only looks at the envelope
//! (`id`, `method`, `result`, `error`); bodies stay opaque `Value`s.

use serde::Serialize;
use serde_json::{Map, Value};

use super::command::{RemoteError, DECODE_FAILURE_CODE};
use crate::error::ProtocolError;

/// Command ID - monotonically increasing per session
pub type CommandId = u64;

/// Outbound command frame
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: CommandId,
    pub method: String,
    pub params: Value,
}

/// How a response ended on the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(Value),
    Failure(RemoteError),
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response {
        id: CommandId,
        outcome: ResponseOutcome,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl InboundFrame {
    /// Classify one text frame.
    ///
    /// `id` present means response, otherwise `method` present means
    /// notification. Anything else is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "expected JSON object, got {}",
                    kind_of(&other)
                )))
            }
        };

        if let Some(id) = take_present(&mut map, "id") {
            let id = id
                .as_u64()
                .ok_or_else(|| ProtocolError::Malformed(format!("invalid id {}", id)))?;
            // error wins over result, same as the browser's own clients
            let error = take_present(&mut map, "error");
            let result = take_present(&mut map, "result");
            let outcome = match (error, result) {
                (Some(error), _) => ResponseOutcome::Failure(remote_error(error)),
                (None, Some(result)) => ResponseOutcome::Success(result),
                (None, None) => ResponseOutcome::Success(empty_object()),
            };
            return Ok(InboundFrame::Response { id, outcome });
        }

        match take_present(&mut map, "method") {
            Some(Value::String(method)) => Ok(InboundFrame::Notification {
                method,
                params: take_present(&mut map, "params").unwrap_or_else(empty_object),
            }),
            Some(other) => Err(ProtocolError::Malformed(format!(
                "method must be a string, got {}",
                kind_of(&other)
            ))),
            None => Err(ProtocolError::Malformed(
                "frame has neither id nor method".to_string(),
            )),
        }
    }
}

/// Remove `key`, treating an explicit `null` as absent.
fn take_present(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    map.remove(key).filter(|value| !value.is_null())
}

/// A response whose error body doesn't decode still belongs to its id,
/// so it fails as a decode error instead of being dropped.
fn remote_error(body: Value) -> RemoteError {
    serde_json::from_value(body).unwrap_or_else(|e| {
        RemoteError::new(DECODE_FAILURE_CODE, format!("malformed error body: {}", e))
    })
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
