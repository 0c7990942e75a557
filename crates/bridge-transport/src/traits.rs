//! Bus and connection abstractions for mbridge.
//!
//! The bridge only needs to publish to the bus; inbound status messages
//! arrive as [`BusMessage`] values on a channel fed by the bus adapter.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Counter mixed into generated IDs so two connections in the same
/// nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a push connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Push connection's outbound queue is full.
    #[error("Send queue full")]
    Lagged,

    /// Failed to publish to the bus.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Full topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new bus message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publishing half of a bus connection.
///
/// Implementations must be cheap to share; the dispatcher holds one behind
/// an `Arc` and calls it from concurrent request handlers.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish one message. No retry is attempted.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Get the bus name (e.g., "mqtt", "memory").
    fn name(&self) -> &'static str;

    /// Check if the bus connection is currently up.
    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_new() {
        let id = ConnectionId::new("test-id");
        assert_eq!(id.to_string(), "test-id");
    }

    #[test]
    fn test_bus_message_new() {
        let msg = BusMessage::new("media/status/a/devices", &b"[]"[..]);
        assert_eq!(msg.topic, "media/status/a/devices");
        assert_eq!(&msg.payload[..], b"[]");
    }
}
