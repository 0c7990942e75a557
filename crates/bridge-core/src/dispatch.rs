//! Command dispatcher.
//!
//! Forwards a command from a push client to one producer over the bus.
//! The dispatcher holds no per-call state: each command is validated,
//! encoded, and published exactly once.

use mbridge_protocol::{codec, validate_identity, ParseError, ProtocolError, TopicCodec};
use mbridge_transport::{BusPublisher, TransportError};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Target identity cannot be used as a topic level.
    #[error(transparent)]
    InvalidIdentity(#[from] ParseError),

    /// No action given.
    #[error("Command action cannot be empty")]
    EmptyAction,

    /// Command could not be serialized.
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The bus rejected the publish.
    #[error(transparent)]
    Publish(#[from] TransportError),
}

impl DispatchError {
    /// Whether the caller sent a bad request, as opposed to a bus failure.
    #[must_use]
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, DispatchError::InvalidIdentity(_) | DispatchError::EmptyAction)
    }
}

/// A command addressed to one producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Target producer.
    pub identity: String,
    /// Action name, e.g. `playpause`.
    pub action: String,
    /// Extra fields merged into the published payload.
    pub payload: Option<Map<String, Value>>,
}

impl Command {
    /// Create a command without extra payload.
    #[must_use]
    pub fn new(identity: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            action: action.into(),
            payload: None,
        }
    }

    /// Attach extra payload fields.
    #[must_use]
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Build the JSON body: the extra fields plus `action` and `serverId`.
    ///
    /// `action` and `serverId` always reflect the command itself, even if
    /// the extra payload carries keys of the same name.
    #[must_use]
    pub fn body(&self) -> Value {
        let mut body = self.payload.clone().unwrap_or_default();
        body.insert("action".to_string(), Value::String(self.action.clone()));
        body.insert("serverId".to_string(), Value::String(self.identity.clone()));
        Value::Object(body)
    }
}

/// Publishes commands to producers.
#[derive(Clone)]
pub struct CommandDispatcher {
    topics: TopicCodec,
    bus: Arc<dyn BusPublisher>,
}

impl CommandDispatcher {
    /// Create a dispatcher publishing on the given bus.
    #[must_use]
    pub fn new(topics: TopicCodec, bus: Arc<dyn BusPublisher>) -> Self {
        Self { topics, bus }
    }

    /// Name of the underlying bus.
    #[must_use]
    pub fn bus_name(&self) -> &'static str {
        self.bus.name()
    }

    /// Whether the underlying bus is connected.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.bus.is_healthy()
    }

    /// Publish a command once.
    ///
    /// Returns the topic it was published on.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is invalid or the publish fails.
    /// Nothing is retried.
    pub async fn dispatch(&self, command: &Command) -> Result<String, DispatchError> {
        validate_identity(&command.identity)?;
        if command.action.trim().is_empty() {
            return Err(DispatchError::EmptyAction);
        }

        let topic = self.topics.build_command_topic(&command.identity);
        let payload = codec::encode(&command.body())?;

        self.bus
            .publish(&topic, payload)
            .await
            .map_err(|e| {
                warn!(topic = %topic, action = %command.action, error = %e, "Command publish failed");
                DispatchError::Publish(e)
            })?;

        debug!(topic = %topic, action = %command.action, bus = self.bus.name(), "Command dispatched");
        Ok(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::PushHub;
    use crate::ingest::Ingestor;
    use mbridge_transport::{BusMessage, MemoryBus};
    use serde_json::json;

    fn dispatcher() -> (CommandDispatcher, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = CommandDispatcher::new(TopicCodec::default(), bus.clone());
        (dispatcher, bus)
    }

    #[tokio::test]
    async fn test_dispatch_publishes_once() {
        let (dispatcher, bus) = dispatcher();
        let command = Command::new("nodeA", "playpause").with_payload(Map::new());

        let topic = dispatcher.dispatch(&command).await.unwrap();
        assert_eq!(topic, "media/commands/nodeA");

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "media/commands/nodeA");

        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body, json!({"action": "playpause", "serverId": "nodeA"}));
    }

    #[tokio::test]
    async fn test_dispatch_merges_payload() {
        let (dispatcher, bus) = dispatcher();
        let mut extra = Map::new();
        extra.insert("volume".to_string(), json!(0.4));
        extra.insert("action".to_string(), json!("spoofed"));

        dispatcher
            .dispatch(&Command::new("nodeB", "setVolume").with_payload(extra))
            .await
            .unwrap();

        let body: Value = serde_json::from_slice(&bus.published()[0].payload).unwrap();
        assert_eq!(
            body,
            json!({"action": "setVolume", "serverId": "nodeB", "volume": 0.4})
        );
    }

    #[tokio::test]
    async fn test_dispatch_publish_failure() {
        let (dispatcher, bus) = dispatcher();
        bus.set_failing(true);

        let err = dispatcher
            .dispatch(&Command::new("nodeA", "next"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Publish(_)));
        assert!(!err.is_invalid_request());

        // No state is kept: the next call goes through once the bus is back.
        bus.set_failing(false);
        dispatcher.dispatch(&Command::new("nodeA", "next")).await.unwrap();
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_requests() {
        let (dispatcher, bus) = dispatcher();

        let err = dispatcher
            .dispatch(&Command::new("node/A", "next"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());

        let err = dispatcher
            .dispatch(&Command::new("nodeA", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyAction));

        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_ingested_producer() {
        let (dispatcher, bus) = dispatcher();
        let mut ingestor = Ingestor::new(TopicCodec::default(), Arc::new(PushHub::new()));

        let long = "n".repeat(200);
        for identity in [long.as_str(), "node\u{1}A", "wohnzimmer-pc"] {
            let topic = format!("media/status/{identity}/devices");
            let ingested = ingestor.handle(&BusMessage::new(topic, &b"[]"[..])).unwrap();

            let topic = dispatcher
                .dispatch(&Command::new(ingested.identity.clone(), "next"))
                .await
                .unwrap();
            assert_eq!(topic, format!("media/commands/{}", ingested.identity));
        }

        assert_eq!(ingestor.store().len(), 3);
        assert_eq!(bus.published().len(), 3);
    }
}
