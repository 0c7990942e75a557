//! Push hub.
//!
//! Tracks live push connections and fans snapshot envelopes out to them.
//! Each connection owns a bounded queue; the hub only ever `try_send`s into
//! it, so one slow client cannot hold up the others or the ingestor.

use crate::store::Snapshot;
use mbridge_protocol::Envelope;
use mbridge_transport::{ConnectionId, TransportError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// A JSON text frame shared between every connection it is sent to.
pub type PushFrame = Arc<str>;

/// Default per-connection queue depth.
const DEFAULT_SEND_BUFFER: usize = 64;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames queued per connection before it is considered dead.
    pub send_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections removed because the send failed.
    pub pruned: Vec<ConnectionId>,
}

/// A registered connection.
#[derive(Debug)]
struct Subscriber {
    id: ConnectionId,
    sender: mpsc::Sender<PushFrame>,
}

impl Subscriber {
    fn try_deliver(&self, frame: &PushFrame) -> Result<(), TransportError> {
        self.sender
            .try_send(Arc::clone(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Lagged,
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }
}

#[derive(Debug)]
struct HubInner {
    subscribers: Vec<Subscriber>,
    latest: Snapshot,
}

/// The push hub.
///
/// Registration and broadcast share one lock, so a new connection either
/// sees a broadcast in its initial snapshot or receives it afterwards as an
/// update, never both and never neither.
#[derive(Debug)]
pub struct PushHub {
    inner: Mutex<HubInner>,
    config: HubConfig,
}

impl PushHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating push hub with config: {:?}", config);
        Self {
            inner: Mutex::new(HubInner {
                subscribers: Vec::new(),
                latest: Arc::from(Vec::new()),
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection.
    ///
    /// Returns its ID and the receiving end of its frame queue. If any
    /// producer has reported, the queue already holds an `initial_state`
    /// envelope.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<PushFrame>) {
        let id = ConnectionId::generate();
        let (sender, receiver) = mpsc::channel(self.config.send_buffer.max(1));
        self.register(id.clone(), sender);
        (id, receiver)
    }

    /// Register a connection under a caller-chosen ID.
    ///
    /// Sends `initial_state` first when the aggregate is non-empty. A
    /// connection whose queue is already closed is not registered.
    pub fn register(&self, id: ConnectionId, sender: mpsc::Sender<PushFrame>) -> bool {
        let mut inner = self.lock();
        let subscriber = Subscriber { id, sender };

        if !inner.latest.is_empty() {
            match Envelope::initial_state(&inner.latest).to_text() {
                Ok(text) => {
                    let frame: PushFrame = Arc::from(text);
                    if let Err(e) = subscriber.try_deliver(&frame) {
                        warn!(connection = %subscriber.id, error = %e, "Initial state not delivered");
                        return false;
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode initial state"),
            }
        }

        debug!(
            connection = %subscriber.id,
            producers = inner.latest.len(),
            "Connection registered"
        );
        inner.subscribers.push(subscriber);
        true
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| &s.id != id);
        let removed = inner.subscribers.len() != before;
        if removed {
            debug!(connection = %id, "Connection deregistered");
        }
        removed
    }

    /// Record a new snapshot and send an `update` envelope to every
    /// connection, pruning those that cannot take it.
    pub fn on_store_changed(&self, origin: &str, snapshot: Snapshot) -> BroadcastReport {
        let mut inner = self.lock();
        inner.latest = snapshot;

        let frame: PushFrame = match Envelope::update(origin, &inner.latest).to_text() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(origin = %origin, error = %e, "Failed to encode update");
                return BroadcastReport::default();
            }
        };

        let (retained, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.subscribers)
            .into_iter()
            .map(|s| {
                let result = s.try_deliver(&frame);
                (s, result)
            })
            .partition(|(_, result)| result.is_ok());

        inner.subscribers = retained.into_iter().map(|(s, _)| s).collect();

        let pruned = removed
            .into_iter()
            .map(|(s, result)| {
                if let Err(e) = result {
                    warn!(connection = %s.id, error = %e, "Pruning connection");
                }
                s.id
            })
            .collect::<Vec<_>>();

        trace!(
            origin = %origin,
            recipients = inner.subscribers.len(),
            pruned = pruned.len(),
            "Broadcast update"
        );

        BroadcastReport {
            delivered: inner.subscribers.len(),
            pruned,
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// The most recent snapshot seen by the hub.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.lock().latest)
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}
