//! Topic multiplexer on top of the [`TransportConnection`].
//!
//! Many local listeners may share one topic; the topic is armed on the wire
//! when its first listener registers and released when its last listener goes
//! away. After every reconnection the connection re-arms all topics listed
//! here, so callers never resubscribe by hand.

use crate::connection::{LinkHandler, TransportConnection};
use crate::metrics;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// A pushed payload as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The payload parsed as JSON.
    Json(serde_json::Value),
    /// The payload was not valid JSON; the bytes are passed through as-is.
    Raw(Bytes),
}

impl Payload {
    fn parse(topic: &str, bytes: Bytes) -> Self {
        match serde_json::from_slice(&bytes) {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Push payload is not JSON, delivering raw bytes");
                metrics::record_parse_error();
                Payload::Raw(bytes)
            }
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    /// Raw payload as UTF-8 text, if it is a raw payload and valid UTF-8.
    #[must_use]
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Payload::Raw(bytes) => std::str::from_utf8(bytes).ok(),
            Payload::Json(_) => None,
        }
    }
}

type Callback = dyn Fn(&Payload) + Send + Sync;

struct Listener {
    id: u64,
    active: AtomicBool,
    callback: Box<Callback>,
}

/// Maps topics to local listeners over the session's single link.
pub struct SubscriptionRegistry {
    connection: TransportConnection,
    /// Listeners per topic, in registration order. An entry exists only
    /// while it has at least one listener.
    topics: DashMap<String, Vec<Arc<Listener>>>,
    next_listener_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create the registry and attach it to `connection`.
    ///
    /// A connection serves a single registry; attaching a second one
    /// replaces the first as the receiver of pushes.
    #[must_use]
    pub fn new(connection: TransportConnection) -> Arc<Self> {
        let registry = Arc::new(Self {
            connection,
            topics: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
        });
        let handler: Weak<dyn LinkHandler> = Arc::downgrade(&registry) as Weak<dyn LinkHandler>;
        registry.connection.set_handler(handler);
        registry
    }

    /// The connection this registry multiplexes.
    #[must_use]
    pub fn connection(&self) -> &TransportConnection {
        &self.connection
    }

    /// Register `listener` for `topic`.
    ///
    /// Only the first listener of a topic arms it on the wire. The returned
    /// handle unsubscribes when dropped or when [`Subscription::unsubscribe`]
    /// is called, whichever comes first.
    pub fn subscribe<F>(self: &Arc<Self>, topic: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(listener),
        });

        {
            let mut listeners = self.topics.entry(topic.clone()).or_default();
            let first = listeners.is_empty();
            listeners.push(listener);
            // Queued while the entry is locked, so arm and release requests
            // for one topic reach the link in map order.
            if first {
                debug!(topic = %topic, "Arming topic");
                self.connection.arm(&topic);
            }
            trace!(topic = %topic, listeners = listeners.len(), "Listener added");
        }
        metrics::set_active_topics(self.topics.len());

        Subscription {
            topic,
            listener_id: id,
            registry: Arc::downgrade(self),
            released: AtomicBool::new(false),
        }
    }

    /// Topics that currently have listeners.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    fn remove_listener(&self, topic: &str, id: u64) {
        if let dashmap::mapref::entry::Entry::Occupied(mut entry) =
            self.topics.entry(topic.to_string())
        {
            entry.get_mut().retain(|listener| {
                if listener.id == id {
                    listener.active.store(false, Ordering::Release);
                    false
                } else {
                    true
                }
            });

            if entry.get().is_empty() {
                debug!(topic = %topic, "Releasing topic");
                self.connection.release(topic);
                entry.remove();
            }
        }
        metrics::set_active_topics(self.topics.len());
    }

    /// Deliver a pushed payload to every listener of `topic`, in
    /// registration order.
    ///
    /// Listeners run without any registry lock held, so they may subscribe
    /// or unsubscribe freely. A listener removed mid-dispatch is skipped.
    fn dispatch(&self, topic: &str, bytes: Bytes) {
        let listeners = match self.topics.get(topic) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(topic = %topic, "Push for topic without listeners");
                return;
            }
        };

        let payload = Payload::parse(topic, bytes);
        for listener in listeners {
            if listener.active.load(Ordering::Acquire) {
                (listener.callback)(&payload);
            }
        }
    }

    /// Deliver `payload` as if the server had pushed it.
    #[cfg(any(test, feature = "test-util"))]
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        self.dispatch(topic, payload.into());
    }
}

impl LinkHandler for SubscriptionRegistry {
    fn active_topics(&self) -> Vec<String> {
        self.topics()
    }

    fn on_publish(&self, topic: &str, payload: Bytes) {
        self.dispatch(topic, payload);
    }
}

/// Handle to one registered listener.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    topic: String,
    listener_id: u64,
    registry: Weak<SubscriptionRegistry>,
    released: AtomicBool,
}

impl Subscription {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// Remove the listener. Calls after the first do nothing.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(&self.topic, self.listener_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("listener_id", &self.listener_id)
            .field("active", &self.is_active())
            .finish()
    }
}
