//! Link abstraction for Herald.
//!
//! A [`Dialer`] opens a [`Link`]: one authenticated duplex frame stream to the
//! server. The connection state machine only talks to these traits, so the
//! WebSocket implementation and the in-memory test link are interchangeable.

use async_trait::async_trait;
use herald_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static LINK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of one established link, used for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a locally unique link ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = LINK_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("link_{:x}_{}", timestamp, seq))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake did not complete in time.
    #[error("Connection timed out")]
    Timeout,

    /// The server refused the link or the handshake was malformed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] herald_protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Opens links to the server.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open and authenticate a new link with the given bearer credential.
    ///
    /// Returns once the server handshake has completed.
    async fn dial(&self, token: &str) -> Result<Box<dyn Link>, TransportError>;

    /// Dialer name for logs (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An established link to the server.
#[async_trait]
pub trait Link: Send + Sync {
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame.
    ///
    /// Returns `None` if the server closed the link cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the link gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("link_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "server-conn-9".into();
        assert_eq!(id.to_string(), "server-conn-9");
    }
}
