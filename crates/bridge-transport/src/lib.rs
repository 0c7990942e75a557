//! # mbridge-transport
//!
//! Message bus abstraction for the mbridge aggregation bridge.
//!
//! - **MQTT** - the production bus, via rumqttc
//! - **Memory** - records publishes, for tests and broker-less runs
//!
//! ## Bus Abstraction
//!
//! Publishing goes through the `BusPublisher` trait so the command path does
//! not care which bus is behind it. Inbound traffic is delivered as a stream
//! of `BusMessage` values.
//!
//! ```rust,ignore
//! use mbridge_transport::{BusMessage, BusPublisher};
//!
//! async fn forward(bus: &dyn BusPublisher, msg: BusMessage) {
//!     let _ = bus.publish(&msg.topic, msg.payload).await;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use memory::MemoryBus;
pub use traits::{BusMessage, BusPublisher, ConnectionId, TransportError};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttConfig, MqttEventLoop};
