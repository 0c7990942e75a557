//! Aggregate store.
//!
//! The store maps each producer identity to its last-known state. It is
//! owned by a single writer (the ingestor); readers get immutable
//! [`Snapshot`] copies.

use mbridge_protocol::{ProducerState, StateUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// An immutable copy of the whole aggregate, in identity insertion order.
pub type Snapshot = Arc<[ProducerState]>;

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First message from this identity; a new entry was created.
    Created,
    /// An existing entry was updated.
    Updated,
}

/// Producer identity -> last-known state.
#[derive(Debug, Default)]
pub struct AggregateStore {
    /// Entries in first-seen order.
    entries: Vec<ProducerState>,
    /// Identity -> position in `entries`.
    index: HashMap<String, usize>,
}

impl AggregateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no producer has reported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the state of one producer.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&ProducerState> {
        self.index.get(identity).map(|&i| &self.entries[i])
    }

    /// Apply an update to a producer, creating its entry if unseen.
    ///
    /// Only the field named by the update is replaced.
    pub fn upsert(&mut self, identity: &str, update: StateUpdate) -> Upsert {
        if let Some(&i) = self.index.get(identity) {
            self.entries[i].apply(update);
            return Upsert::Updated;
        }

        debug!(identity = %identity, "New producer");
        let mut state = ProducerState::new(identity);
        state.apply(update);
        self.index.insert(identity.to_string(), self.entries.len());
        self.entries.push(state);
        Upsert::Created
    }

    /// Take a consistent copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.entries.iter().cloned().collect()
    }
}
