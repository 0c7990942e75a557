//! Push envelope types.
//!
//! Every envelope carries the full aggregate snapshot, never a delta, so
//! clients can replace their view wholesale on each frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{encode_text, ProtocolError, StateUpdate};

/// Last-known state of one producer, as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerState {
    /// Producer identity.
    pub identity: String,
    /// Media info, `null` until the producer reports one.
    #[serde(default)]
    pub media_info: Option<Value>,
    /// Device list, empty until the producer reports one.
    #[serde(default)]
    pub devices: Vec<Value>,
}

impl ProducerState {
    /// Create an entry with both fields at their defaults.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            media_info: None,
            devices: Vec::new(),
        }
    }

    /// Replace the field selected by the update. The other field is untouched.
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::MediaInfo(info) => self.media_info = Some(info),
            StateUpdate::Devices(devices) => self.devices = devices,
        }
    }
}

/// A server-to-client push frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope<'a> {
    /// Sent once to a new connection when the aggregate is non-empty.
    InitialState {
        /// Full snapshot.
        data: &'a [ProducerState],
    },

    /// Sent to every connection after a producer's state changed.
    Update {
        /// Producer whose message caused this update.
        #[serde(rename = "serverId")]
        server_id: &'a str,
        /// Full snapshot.
        data: &'a [ProducerState],
    },
}

impl<'a> Envelope<'a> {
    /// Create an `initial_state` envelope.
    #[must_use]
    pub fn initial_state(data: &'a [ProducerState]) -> Self {
        Envelope::InitialState { data }
    }

    /// Create an `update` envelope.
    #[must_use]
    pub fn update(server_id: &'a str, data: &'a [ProducerState]) -> Self {
        Envelope::Update { server_id, data }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        encode_text(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_leaves_other_field() {
        let mut state = ProducerState::new("nodeA");
        state.apply(StateUpdate::Devices(vec![json!({"name": "Speakers"})]));
        assert!(state.media_info.is_none());
        assert_eq!(state.devices.len(), 1);

        state.apply(StateUpdate::MediaInfo(json!({"title": "Song"})));
        assert_eq!(state.devices.len(), 1);
        assert_eq!(state.media_info, Some(json!({"title": "Song"})));

        state.apply(StateUpdate::Devices(vec![]));
        assert!(state.devices.is_empty());
        assert!(state.media_info.is_some());
    }

    #[test]
    fn test_initial_state_shape() {
        let mut state = ProducerState::new("nodeA");
        state.apply(StateUpdate::Devices(vec![
            json!({"name": "Speakers", "volume": 0.8}),
        ]));
        let snapshot = vec![state];

        let text = Envelope::initial_state(&snapshot).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "initial_state",
                "data": [{
                    "identity": "nodeA",
                    "mediaInfo": null,
                    "devices": [{"name": "Speakers", "volume": 0.8}]
                }]
            })
        );
    }

    #[test]
    fn test_update_shape() {
        let snapshot = vec![ProducerState::new("nodeA"), ProducerState::new("nodeB")];
        let text = Envelope::update("nodeB", &snapshot).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["serverId"], "nodeB");
        assert_eq!(value["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_producer_state_deserialize_defaults() {
        let state: ProducerState = serde_json::from_str(r#"{"identity":"x"}"#).unwrap();
        assert_eq!(state, ProducerState::new("x"));
    }
}
