//! # mbridge-core
//!
//! State aggregation and fan-out for the mbridge media bridge.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Store** - Producer identity -> last-known media info and devices
//! - **Ingestor** - Applies bus status messages to the store
//! - **Hub** - Pushes full snapshots to live connections
//! - **Dispatcher** - Publishes commands back to producers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Bus (MQTT) │────▶│  Ingestor   │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │ Dispatcher  │     │     Hub     │────▶ push connections
//! └─────────────┘     └─────────────┘
//! ```

pub mod dispatch;
pub mod hub;
pub mod ingest;
pub mod store;

pub use dispatch::{Command, CommandDispatcher, DispatchError};
pub use hub::{BroadcastReport, HubConfig, PushFrame, PushHub};
pub use ingest::{IngestStats, Ingested, Ingestor};
pub use store::{AggregateStore, Snapshot, Upsert};
