//! Bus ingestor.
//!
//! Turns inbound status messages into store updates and broadcasts. The
//! ingestor is the store's only writer; callers feed it one message at a
//! time in bus delivery order.

use crate::hub::{BroadcastReport, PushHub};
use crate::store::{AggregateStore, Upsert};
use mbridge_protocol::{codec, ProtocolError, Subchannel, TopicCodec};
use mbridge_transport::BusMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What happened to one applied message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// Producer the message belonged to.
    pub identity: String,
    /// Field that was replaced.
    pub subchannel: Subchannel,
    /// Whether this was the producer's first message.
    pub upsert: Upsert,
    /// Known producers after the update.
    pub producers: usize,
    /// Fan-out result.
    pub broadcast: BroadcastReport,
}

/// Running totals for an ingest loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages applied to the store.
    pub applied: u64,
    /// Messages dropped at parse or decode.
    pub dropped: u64,
}

/// The single writer of the aggregate store.
pub struct Ingestor {
    topics: TopicCodec,
    store: AggregateStore,
    hub: Arc<PushHub>,
}

impl Ingestor {
    /// Create an ingestor with an empty store.
    #[must_use]
    pub fn new(topics: TopicCodec, hub: Arc<PushHub>) -> Self {
        Self {
            topics,
            store: AggregateStore::new(),
            hub,
        }
    }

    /// Read access to the store.
    #[must_use]
    pub fn store(&self) -> &AggregateStore {
        &self.store
    }

    /// Apply one bus message and broadcast the result.
    ///
    /// A malformed topic or payload leaves the store untouched and is
    /// reported as an error; the ingestor stays usable either way.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Parse`] or [`ProtocolError::Decode`] when the
    /// message is dropped.
    pub fn handle(&mut self, message: &BusMessage) -> Result<Ingested, ProtocolError> {
        let status = codec::decode_status(&self.topics, &message.topic, &message.payload)
            .map_err(|e| {
                warn!(topic = %message.topic, kind = e.kind(), error = %e, "Dropping status message");
                e
            })?;

        let subchannel = status.update.subchannel();
        let upsert = self.store.upsert(&status.identity, status.update);
        let broadcast = self
            .hub
            .on_store_changed(&status.identity, self.store.snapshot());

        debug!(
            identity = %status.identity,
            subchannel = %subchannel,
            recipients = broadcast.delivered,
            "Applied status message"
        );

        Ok(Ingested {
            identity: status.identity,
            subchannel,
            upsert,
            producers: self.store.len(),
            broadcast,
        })
    }

    /// Consume messages until the channel closes, calling `observe` with
    /// the outcome of each one.
    pub async fn run<F>(
        mut self,
        mut inbound: mpsc::Receiver<BusMessage>,
        mut observe: F,
    ) -> IngestStats
    where
        F: FnMut(&Result<Ingested, ProtocolError>) + Send,
    {
        let mut stats = IngestStats::default();
        info!(filters = ?self.topics.status_filters(), "Ingest loop started");

        while let Some(message) = inbound.recv().await {
            let result = self.handle(&message);
            match &result {
                Ok(_) => stats.applied += 1,
                Err(_) => stats.dropped += 1,
            }
            observe(&result);
        }

        info!(
            applied = stats.applied,
            dropped = stats.dropped,
            producers = self.store.len(),
            "Ingest loop stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn ingestor() -> (Ingestor, Arc<PushHub>) {
        let hub = Arc::new(PushHub::new());
        (Ingestor::new(TopicCodec::default(), Arc::clone(&hub)), hub)
    }

    #[test]
    fn test_unseen_identity_creates_entry() {
        let (mut ingestor, _hub) = ingestor();
        let result = ingestor
            .handle(&BusMessage::new("media/status/nodeA/devices", &b"[]"[..]))
            .unwrap();
        assert_eq!(result.upsert, Upsert::Created);
        assert_eq!(result.subchannel, Subchannel::Devices);
        assert_eq!(result.producers, 1);

        let entry = ingestor.store().get("nodeA").unwrap();
        assert!(entry.media_info.is_none());
        assert!(entry.devices.is_empty());
        assert_eq!(ingestor.store().len(), 1);
    }

    #[test]
    fn test_malformed_messages_do_not_touch_store() {
        let (mut ingestor, hub) = ingestor();
        let (_id, mut rx) = hub.connect();

        ingestor
            .handle(&BusMessage::new("media/status/nodeA/media", &br#"{"title":"a"}"#[..]))
            .unwrap();
        rx.try_recv().unwrap();

        let bad_payload = ingestor.handle(&BusMessage::new("media/status/nodeA/media", &b"{oops"[..]));
        assert!(matches!(bad_payload, Err(ProtocolError::Decode(_))));

        let bad_devices =
            ingestor.handle(&BusMessage::new("media/status/nodeA/devices", &b"{}"[..]));
        assert!(matches!(bad_devices, Err(ProtocolError::Decode(_))));

        let bad_topic = ingestor.handle(&BusMessage::new("elsewhere/nodeA", &b"{}"[..]));
        assert!(matches!(bad_topic, Err(ProtocolError::Parse(_))));

        // Nothing was broadcast and the earlier state survives.
        assert!(rx.try_recv().is_err());
        assert_eq!(
            ingestor.store().get("nodeA").unwrap().media_info,
            Some(json!({"title": "a"}))
        );

        // The next good message is applied immediately.
        ingestor
            .handle(&BusMessage::new("media/status/nodeA/media", &br#"{"title":"b"}"#[..]))
            .unwrap();
        assert_eq!(
            ingestor.store().get("nodeA").unwrap().media_info,
            Some(json!({"title": "b"}))
        );
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "update");
        assert_eq!(frame["data"][0]["mediaInfo"]["title"], "b");
    }

    #[test]
    fn test_end_to_end_initial_state() {
        let (mut ingestor, hub) = ingestor();
        ingestor
            .handle(&BusMessage::new(
                "media/status/nodeA/devices",
                &br#"[{"name":"Speakers","volume":0.8}]"#[..],
            ))
            .unwrap();

        let (_id, mut rx) = hub.connect();
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            frame,
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

    #[tokio::test]
    async fn test_run_counts_and_continues() {
        let (ingestor, hub) = ingestor();
        let (tx, rx) = mpsc::channel(8);

        tx.send(BusMessage::new("media/status/a/devices", &b"not json"[..]))
            .await
            .unwrap();
        tx.send(BusMessage::new("media/status/a/devices", &b"[1]"[..]))
            .await
            .unwrap();
        tx.send(BusMessage::new("media/status/b", &b"{}"[..]))
            .await
            .unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        let stats = ingestor
            .run(rx, |result| {
                kinds.push(result.as_ref().map(|_| ()).map_err(ProtocolError::kind))
            })
            .await;

        assert_eq!(stats, IngestStats { applied: 2, dropped: 1 });
        assert_eq!(kinds, vec![Err("decode"), Ok(()), Ok(())]);
        assert_eq!(hub.snapshot().len(), 2);
    }
}
