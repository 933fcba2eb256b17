//! # herald-protocol
//!
//! Wire protocol for the Herald notification link.
//!
//! A client keeps one multiplexed link to the server. Topics are armed with
//! `subscribe`, released with `unsubscribe`, and the server pushes `publish`
//! frames carrying opaque payloads for armed topics.
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("notifications/u1/count", b"4".to_vec());
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, PROTOCOL_VERSION};
