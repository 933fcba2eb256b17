//! Scripted in-memory dialer and link for tests.

use crate::connection::{ConnectionState, TransportConnection};
use crate::traits::{ConnectionId, Dialer, Link, TransportError};
use async_trait::async_trait;
use herald_protocol::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Outcome of the next dial.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    Accept,
    Refuse,
    /// Dial succeeds but the link is already dead: every send fails.
    Broken,
}

/// Dialer whose outcomes are fed by the test, one per dial.
///
/// A dial waits until the test scripts its outcome.
pub(crate) struct MockDialer {
    script: Mutex<mpsc::UnboundedReceiver<Script>>,
    servers: mpsc::UnboundedSender<MockServer>,
    dials: AtomicUsize,
}

pub(crate) struct DialerControl {
    script: mpsc::UnboundedSender<Script>,
    servers: mpsc::UnboundedReceiver<MockServer>,
}

impl MockDialer {
    pub(crate) fn new() -> (Arc<Self>, DialerControl) {
        let (script_tx, script_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            script: Mutex::new(script_rx),
            servers: server_tx,
            dials: AtomicUsize::new(0),
        });
        let control = DialerControl {
            script: script_tx,
            servers: server_rx,
        };
        (dialer, control)
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _token: &str) -> Result<Box<dyn Link>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.recv().await;
        match next {
            Some(Script::Accept) => {
                let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
                let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(MockServer {
                    to_client: to_client_tx,
                    from_client: from_client_rx,
                });
                Ok(Box::new(MockLink {
                    id: ConnectionId::generate(),
                    to_client: to_client_rx,
                    from_client: from_client_tx,
                    open: true,
                }))
            }
            Some(Script::Broken) => {
                let (_, to_client_rx) = mpsc::unbounded_channel();
                let (from_client_tx, _) = mpsc::unbounded_channel();
                Ok(Box::new(MockLink {
                    id: ConnectionId::generate(),
                    to_client: to_client_rx,
                    from_client: from_client_tx,
                    open: false,
                }))
            }
            Some(Script::Refuse) | None => Err(TransportError::Handshake("refused".into())),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl DialerControl {
    pub(crate) fn script(&self, outcome: Script) {
        let _ = self.script.send(outcome);
    }

    /// Server end of the next accepted link.
    pub(crate) async fn next_server(&mut self) -> Option<MockServer> {
        tokio::time::timeout(Duration::from_secs(30), self.servers.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Server end of a [`MockLink`]. Dropping it closes the link.
pub(crate) struct MockServer {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockServer {
    pub(crate) fn send(&self, frame: Frame) {
        let _ = self.to_client.send(frame);
    }

    pub(crate) fn push(&self, topic: &str, payload: &[u8]) {
        self.send(Frame::publish(topic, payload.to_vec()));
    }

    /// Next frame the client sent, or `None` once the client side is gone.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(30), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Topic names of the next `n` subscribe frames, sorted.
    pub(crate) async fn subscribed_topics(&mut self, n: usize) -> Vec<String> {
        let mut topics = Vec::with_capacity(n);
        while topics.len() < n {
            match self.next_frame().await {
                Some(Frame::Subscribe { channel, .. }) => topics.push(channel),
                Some(other) => panic!("Expected subscribe, got {:?}", other),
                None => break,
            }
        }
        topics.sort();
        topics
    }
}

struct MockLink {
    id: ConnectionId,
    to_client: mpsc::UnboundedReceiver<Frame>,
    from_client: mpsc::UnboundedSender<Frame>,
    open: bool,
}

#[async_trait]
impl Link for MockLink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        let frame = self.to_client.recv().await;
        if frame.is_none() {
            self.open = false;
        }
        Ok(frame)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }
        self.from_client
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub(crate) async fn wait_for_state(conn: &TransportConnection, state: ConnectionState) {
    let mut changes = conn.state_changes();
    tokio::time::timeout(Duration::from_secs(30), changes.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
        .expect("state sender alive");
}
