//! # mbridge-protocol
//!
//! Wire definitions for the mbridge media aggregation bridge.
//!
//! - **Topics** - `media/status/<identity>/<subchannel>` in,
//!   `media/commands/<identity>` out
//! - **Codec** - JSON payload decoding into tagged state updates
//! - **Envelopes** - `initial_state` / `update` push frames
//!
//! ## Example
//!
//! ```rust
//! use mbridge_protocol::{codec, Envelope, ProducerState, TopicCodec};
//!
//! let topics = TopicCodec::default();
//! let msg = codec::decode_status(&topics, "media/status/nodeA/devices", b"[]").unwrap();
//!
//! let mut state = ProducerState::new(msg.identity);
//! state.apply(msg.update);
//!
//! let snapshot = vec![state];
//! let frame = Envelope::initial_state(&snapshot).to_text().unwrap();
//! assert!(frame.contains("initial_state"));
//! ```

pub mod codec;
pub mod envelope;
pub mod topic;

pub use codec::{DecodeError, ProtocolError, StateUpdate, StatusMessage};
pub use envelope::{Envelope, ProducerState};
pub use topic::{validate_identity, ParseError, StatusTopic, Subchannel, TopicCodec};
