//! # herald-transport
//!
//! Client side of the Herald realtime link.
//!
//! - [`TransportConnection`] owns the session's single link: dialing with the
//!   bearer credential, a small state machine, and a bounded fixed-delay
//!   reconnect loop.
//! - [`SubscriptionRegistry`] multiplexes topics over that link, fans pushed
//!   payloads out to local listeners, and re-arms every topic after a
//!   reconnect.
//!
//! Links are opened through the [`Dialer`] trait; the WebSocket dialer is
//! enabled by the default `websocket` feature.
//!
//! ```rust,ignore
//! use herald_transport::{
//!     ConnectionConfig, EnvCredentials, SubscriptionRegistry, TransportConnection,
//!     WebSocketDialer,
//! };
//! use std::sync::Arc;
//!
//! let connection = TransportConnection::new(
//!     ConnectionConfig::default(),
//!     Arc::new(WebSocketDialer::with_url("wss://example.com/ws")),
//!     Arc::new(EnvCredentials),
//! );
//! let registry = SubscriptionRegistry::new(connection.clone());
//! let _sub = registry.subscribe("notifications/u1", |payload| println!("{:?}", payload));
//! connection.connect();
//! ```

pub mod connection;
pub mod credentials;
pub mod metrics;
pub mod registry;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionConfig, ConnectionState, TransportConnection};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use registry::{Payload, Subscription, SubscriptionRegistry};
pub use traits::{ConnectionId, Dialer, Link, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketDialer};
