//! JSON payload codec.
//!
//! Status payloads arrive as JSON text and are decoded into a tagged
//! [`StateUpdate`] chosen by the topic's subchannel. Outbound payloads
//! (commands, push envelopes) are encoded back to JSON text.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::topic::{ParseError, Subchannel, TopicCodec};

/// Maximum accepted status payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Errors raised while decoding a status payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A device list payload was not a JSON array.
    #[error("Device list must be a JSON array, got {0}")]
    NotAnArray(&'static str),

    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("Payload size {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    TooLarge(usize),
}

/// Protocol errors that can occur while handling bus traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed topic.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Malformed payload.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Failed to serialize an outbound payload.
    #[error("Encoding error: {0}")]
    Encode(serde_json::Error),
}

impl ProtocolError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Parse(_) => "parse",
            ProtocolError::Decode(_) => "decode",
            ProtocolError::Encode(_) => "encode",
        }
    }
}

/// A decoded status payload, tagged with the field it replaces.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Replace the producer's media info.
    MediaInfo(Value),
    /// Replace the producer's device list.
    Devices(Vec<Value>),
}

impl StateUpdate {
    /// The subchannel this update targets.
    #[must_use]
    pub fn subchannel(&self) -> Subchannel {
        match self {
            StateUpdate::MediaInfo(_) => Subchannel::MediaInfo,
            StateUpdate::Devices(_) => Subchannel::Devices,
        }
    }
}

/// A fully decoded status message.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    /// Producer the update belongs to.
    pub identity: String,
    /// The update itself.
    pub update: StateUpdate,
}

/// Decode a JSON payload.
///
/// # Errors
///
/// Returns an error if the payload is too large or not valid JSON.
pub fn decode(payload: &[u8]) -> Result<Value, DecodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::TooLarge(payload.len()));
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Decode a payload for the given subchannel.
///
/// # Errors
///
/// Returns an error if the payload is not JSON, or if a device list
/// payload is not an array.
pub fn decode_update(subchannel: Subchannel, payload: &[u8]) -> Result<StateUpdate, DecodeError> {
    let value = decode(payload)?;
    match subchannel {
        Subchannel::MediaInfo => Ok(StateUpdate::MediaInfo(value)),
        Subchannel::Devices => match value {
            Value::Array(devices) => Ok(StateUpdate::Devices(devices)),
            other => Err(DecodeError::NotAnArray(json_type_name(&other))),
        },
    }
}

/// Parse a status topic and decode its payload in one step.
///
/// # Errors
///
/// Returns [`ProtocolError::Parse`] for a malformed topic and
/// [`ProtocolError::Decode`] for a malformed payload.
pub fn decode_status(
    topics: &TopicCodec,
    topic: &str,
    payload: &[u8],
) -> Result<StatusMessage, ProtocolError> {
    let parsed = topics.parse_status_topic(topic)?;
    let update = decode_update(parsed.subchannel, payload)?;
    Ok(StatusMessage {
        identity: parsed.identity,
        update,
    })
}

/// Encode a value as JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

/// Encode a value as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text<T: Serialize + ?Sized>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(ProtocolError::Encode)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_devices() {
        let update =
            decode_update(Subchannel::Devices, br#"[{"name":"Speakers","volume":0.8}]"#).unwrap();
        assert_eq!(
            update,
            StateUpdate::Devices(vec![json!({"name": "Speakers", "volume": 0.8})])
        );
        assert_eq!(update.subchannel(), Subchannel::Devices);
    }

    #[test]
    fn test_decode_devices_rejects_object() {
        let err = decode_update(Subchannel::Devices, br#"{"name":"Speakers"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::NotAnArray("object")));
    }

    #[test]
    fn test_decode_media_info_accepts_any_json() {
        let update = decode_update(Subchannel::MediaInfo, br#"{"title":"Song","playing":true}"#)
            .unwrap();
        assert_eq!(
            update,
            StateUpdate::MediaInfo(json!({"title": "Song", "playing": true}))
        );
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            decode_update(Subchannel::MediaInfo, b"{not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_update(Subchannel::Devices, b""),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_decode_too_large() {
        let payload = vec![b' '; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(decode(&payload), Err(DecodeError::TooLarge(_))));
    }

    #[test]
    fn test_decode_status() {
        let topics = TopicCodec::default();
        let msg = decode_status(&topics, "media/status/nodeA/devices", b"[]").unwrap();
        assert_eq!(msg.identity, "nodeA");
        assert_eq!(msg.update, StateUpdate::Devices(vec![]));

        let err = decode_status(&topics, "other/topic", b"[]").unwrap_err();
        assert_eq!(err.kind(), "parse");

        let err = decode_status(&topics, "media/status/nodeA", b"nope").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_encode() {
        let bytes = encode(&json!({"action": "next"})).unwrap();
        assert_eq!(&bytes[..], br#"{"action":"next"}"#);
        assert_eq!(encode_text(&json!([1, 2])).unwrap(), "[1,2]");
    }
}
