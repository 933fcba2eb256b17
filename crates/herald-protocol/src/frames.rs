//! Frame types for the Herald link.
//!
//! A client holds exactly one link to the server and multiplexes every topic
//! over it. Frames are tagged by a `type` field and serialized with MessagePack.

use serde::{Deserialize, Serialize};

/// Protocol major version carried by `connect` and `connected`. Peers must
/// agree on it exactly.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 0x01,
    Unsubscribe = 0x02,
    Publish = 0x03,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Connect = 0x09,
    Connected = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Subscribe),
            0x02 => Ok(FrameType::Unsubscribe),
            0x03 => Ok(FrameType::Publish),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x09 => Ok(FrameType::Connect),
            0x0A => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

impl FrameType {
    /// Lowercase name, matching the serde tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Subscribe => "subscribe",
            FrameType::Unsubscribe => "unsubscribe",
            FrameType::Publish => "publish",
            FrameType::Ack => "ack",
            FrameType::Error => "error",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Connect => "connect",
            FrameType::Connected => "connected",
        }
    }
}

/// A frame exchanged over the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Arm a topic on the link.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Per-link request ID, echoed by `ack` or `error`.
        id: u64,
        /// Topic name.
        channel: String,
    },

    /// Release a topic on the link.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Per-link request ID.
        id: u64,
        /// Topic name.
        channel: String,
    },

    /// A message pushed to a topic.
    #[serde(rename = "publish")]
    Publish {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Topic the payload belongs to.
        channel: String,
        /// Optional event name.
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        /// Opaque payload, JSON for notification topics.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Client handshake, the first frame on a new link.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol major version.
        version: u8,
        /// Bearer credential.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Server handshake reply.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Topic the frame refers to, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Frame::Subscribe { channel, .. }
            | Frame::Unsubscribe { channel, .. }
            | Frame::Publish { channel, .. } => Some(channel.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn subscribe(id: u64, channel: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            channel: channel.into(),
        }
    }

    #[must_use]
    pub fn unsubscribe(id: u64, channel: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            channel: channel.into(),
        }
    }

    /// Create a Publish frame without acknowledgment.
    #[must_use]
    pub fn publish(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            id: None,
            channel: channel.into(),
            event: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Client handshake at [`PROTOCOL_VERSION`].
    #[must_use]
    pub fn connect(token: Option<String>) -> Self {
        Frame::Connect {
            version: PROTOCOL_VERSION,
            token,
        }
    }

    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        assert_eq!(Frame::subscribe(1, "t").frame_type(), FrameType::Subscribe);
        assert_eq!(Frame::publish("t", b"x".to_vec()).frame_type(), FrameType::Publish);
        assert_eq!(Frame::pong(None).frame_type(), FrameType::Pong);
        assert_eq!(Frame::ack(3).frame_type().as_str(), "ack");
    }

    #[test]
    fn test_connect_carries_protocol_version() {
        match Frame::connect(None) {
            Frame::Connect { version, token } => {
                assert_eq!(version, PROTOCOL_VERSION);
                assert!(token.is_none());
            }
            other => panic!("Expected connect, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x0A), Ok(FrameType::Connected));
        assert_eq!(u8::from(FrameType::Unsubscribe), 0x02);
        assert!(FrameType::try_from(0x04).is_err());
        assert!(FrameType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_frame_topic() {
        assert_eq!(
            Frame::subscribe(7, "notifications/u1").topic(),
            Some("notifications/u1")
        );
        assert_eq!(
            Frame::publish("notifications/u1/count", b"3".to_vec()).topic(),
            Some("notifications/u1/count")
        );
        assert_eq!(Frame::ack(7).topic(), None);
    }
}
