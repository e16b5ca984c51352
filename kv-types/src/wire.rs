//! JSON wire encoding of change events.
//!
//! One JSON object per transport frame:
//!
//! ```text
//! {"type":"set","key":"k","update":1700000000000,"value":<any>}
//! {"type":"delete","key":"k","update":1700000000000}
//! ```
//!
//! An optional `"origin"` field identifies the producing process. Receivers
//! ignore messages whose `type` they do not recognize so that peers running
//! different versions never break each other.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{ChangeEvent, ChangeKind, CodecError, OriginId, Timestamp};

/// Flat message layout shared by all event kinds.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    key: String,
    update: Timestamp,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<OriginId>,
}

/// Distinguishes `"value": null` (present) from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Encode a change event as a JSON text frame.
pub fn encode(event: &ChangeEvent) -> Result<String, CodecError> {
    let message = WireMessage {
        kind: event.type_name().to_string(),
        key: event.key.clone(),
        update: event.timestamp,
        value: event.value().cloned(),
        origin: event.origin,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decode one frame.
///
/// Returns `Ok(None)` for messages with an unrecognized `type`.
pub fn decode(frame: &[u8]) -> Result<Option<ChangeEvent>, CodecError> {
    let raw: Value = serde_json::from_slice(frame)?;
    match raw.get("type").and_then(Value::as_str) {
        Some("set") | Some("delete") => {}
        _ => return Ok(None),
    }

    let message: WireMessage = serde_json::from_value(raw)?;
    let kind = match message.kind.as_str() {
        "set" => match message.value {
            Some(value) => ChangeKind::Set { value },
            None => return Err(CodecError::MissingValue { key: message.key }),
        },
        _ => ChangeKind::Delete,
    };

    Ok(Some(ChangeEvent {
        key: message.key,
        kind,
        timestamp: message.update,
        origin: message.origin,
    }))
}
