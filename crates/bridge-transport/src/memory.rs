//! In-memory bus.
//!
//! Records everything published to it. Used by tests and by the server when
//! no broker is configured.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::trace;

use crate::traits::{BusMessage, BusPublisher, TransportError};

/// A bus that keeps published messages in memory.
#[derive(Debug, Default)]
pub struct MemoryBus {
    published: Mutex<Vec<BusMessage>>,
    failing: AtomicBool,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("memory bus offline".into()));
        }

        trace!(topic = %topic, bytes = payload.len(), "Memory publish");
        self.published
            .lock()
            .map_err(|_| TransportError::Other("memory bus poisoned".into()))?
            .push(BusMessage::new(topic, payload));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_records() {
        let bus = MemoryBus::new();
        bus.publish("a/b", Bytes::from_static(b"1")).await.unwrap();
        bus.publish("a/c", Bytes::from_static(b"2")).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "a/b");
        assert_eq!(&published[1].payload[..], b"2");
    }

    #[tokio::test]
    async fn test_memory_bus_failing() {
        let bus = MemoryBus::new();
        bus.set_failing(true);
        assert!(!bus.is_healthy());
        assert!(matches!(
            bus.publish("a/b", Bytes::new()).await,
            Err(TransportError::PublishFailed(_))
        ));
        assert!(bus.published().is_empty());
    }
}
