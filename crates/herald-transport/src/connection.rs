//! The session's single link to the server.
//!
//! [`TransportConnection`] owns link lifecycle only: dialing with the bearer
//! credential, the `Disconnected -> Connecting -> Connected` state machine, and
//! a bounded fixed-delay reconnect loop that settles in `Failed`.
//!
//! One background task owns the link. Wire-level subscribe and unsubscribe
//! requests are queued to it by the [`SubscriptionRegistry`], which is the
//! only caller of those primitives. On every (re)connection the task re-arms
//! the registry's whole topic set before it drains any queued request, and it
//! tracks what is armed on the current link so a queued request that the
//! re-arm already covered is neither lost nor sent twice.
//!
//! [`SubscriptionRegistry`]: crate::registry::SubscriptionRegistry

use crate::credentials::CredentialSource;
use crate::metrics;
use crate::traits::{Dialer, Link, TransportError};
use bytes::Bytes;
use herald_protocol::Frame;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Link state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The reconnect budget is exhausted; only an explicit `connect()` retries.
    Failed,
}

/// Reconnect policy.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay before every automatic reconnect.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts after which the loop stops in `Failed`.
    /// A dial counts as failed until the re-arm on the new link completes.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
        }
    }
}

/// Receives link events. Implemented by the registry.
pub(crate) trait LinkHandler: Send + Sync {
    /// Topics that must be armed on a fresh link.
    fn active_topics(&self) -> Vec<String>;

    /// A payload pushed by the server for `topic`.
    fn on_publish(&self, topic: &str, payload: Bytes);
}

#[derive(Debug)]
enum Command {
    Arm(String),
    Release(String),
    RetryNow,
    Close,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

struct Shared {
    config: ConnectionConfig,
    dialer: Arc<dyn Dialer>,
    credentials: Arc<dyn CredentialSource>,
    state: watch::Sender<ConnectionState>,
    failures: AtomicU32,
    handler: Mutex<Option<Weak<dyn LinkHandler>>>,
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = ?next, "Connection state changed");
            metrics::set_connection_state(next);
        }
    }

    fn handler(&self) -> Option<Arc<dyn LinkHandler>> {
        lock(&self.handler).as_ref().and_then(Weak::upgrade)
    }

    fn active_topics(&self) -> Vec<String> {
        self.handler()
            .map(|h| h.active_topics())
            .unwrap_or_default()
    }
}

/// Handle to the session's link. Cheap to clone; all clones share one link.
///
/// Exactly one instance should exist per client session. Construct it once
/// and hand clones to whoever needs it.
#[derive(Clone)]
pub struct TransportConnection {
    shared: Arc<Shared>,
}

impl TransportConnection {
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        dialer: Arc<dyn Dialer>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                dialer,
                credentials,
                state,
                failures: AtomicU32::new(0),
                handler: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Consecutive failed attempts since the link last reached `Connected`.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    /// Start the link.
    ///
    /// No-op while `Connecting` or `Connected`. While waiting between
    /// automatic reconnects it retries immediately with a fresh attempt
    /// budget. Without a bearer credential it logs and returns; call again
    /// once the credential exists.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut worker = lock(&self.shared.worker);

        if let Some(running) = worker.as_ref().filter(|w| !w.task.is_finished()) {
            match self.state() {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(state = ?self.state(), "connect() ignored, link already active");
                }
                _ => {
                    debug!("connect() during reconnect delay, retrying now");
                    let _ = running.commands.send(Command::RetryNow);
                }
            }
            return;
        }

        if self.shared.credentials.bearer_token().is_none() {
            info!("No bearer credential available, connect() deferred");
            return;
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        self.shared.failures.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_link(shared, receiver));
        *worker = Some(Worker { commands, task });
    }

    /// Tear down the link and stop reconnecting.
    ///
    /// Armed topics are released on the wire before the link closes. Local
    /// registry listeners are kept, so a later `connect()` re-arms them.
    /// Calling this more than once is harmless.
    pub async fn disconnect(&self) {
        let worker = lock(&self.shared.worker).take();

        if let Some(Worker { commands, task }) = worker {
            let _ = commands.send(Command::Close);
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Link task panicked");
                }
            }
            info!("Disconnected");
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn set_handler(&self, handler: Weak<dyn LinkHandler>) {
        *lock(&self.shared.handler) = Some(handler);
    }

    /// Queue a wire subscribe. Dropped when no link task is running; the
    /// re-arm on the next connection covers it.
    pub(crate) fn arm(&self, topic: &str) {
        self.send_command(Command::Arm(topic.to_string()));
    }

    pub(crate) fn release(&self, topic: &str) {
        self.send_command(Command::Release(topic.to_string()));
    }

    fn send_command(&self, command: Command) {
        if let Some(worker) = lock(&self.shared.worker).as_ref() {
            if worker.commands.send(command).is_err() {
                trace!("Link task gone, command dropped");
            }
        }
    }
}

enum SessionEnd {
    /// Closed on request; do not reconnect.
    Closed,
    /// Lost or refused; the reconnect policy applies.
    Dropped,
}

enum Backoff {
    Elapsed,
    RetryNow,
    Close,
}

async fn run_link(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let dialer = shared.dialer.name();

    loop {
        let Some(token) = shared.credentials.bearer_token() else {
            info!("Bearer credential no longer available, link stopped");
            shared.set_state(ConnectionState::Disconnected);
            return;
        };

        shared.set_state(ConnectionState::Connecting);
        metrics::record_reconnect_attempt();

        let end = match dial_or_close(&shared, &token, &mut commands).await {
            None => SessionEnd::Closed,
            Some(Ok(link)) => run_session(&shared, link, &mut commands).await,
            Some(Err(e)) => {
                let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(dialer, attempt = failures, error = %e, "Dial failed");
                SessionEnd::Dropped
            }
        };

        if let SessionEnd::Closed = end {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        let failures = shared.failures.load(Ordering::SeqCst);
        if failures >= shared.config.max_reconnect_attempts {
            warn!(
                attempts = failures,
                "Reconnect budget exhausted, waiting for an explicit connect()"
            );
            shared.set_state(ConnectionState::Failed);
            return;
        }

        shared.set_state(ConnectionState::Disconnected);
        debug!(delay = ?shared.config.reconnect_delay, "Reconnect scheduled");

        match backoff(shared.config.reconnect_delay, &mut commands).await {
            Backoff::Elapsed => {}
            Backoff::RetryNow => shared.failures.store(0, Ordering::SeqCst),
            Backoff::Close => {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Dial, unless a close request arrives first.
///
/// Arm and release requests seen while dialing are dropped: the re-arm reads
/// the registry after the link is up, so it already reflects them. A finished
/// dial wins over queued requests; those are left for the session.
async fn dial_or_close(
    shared: &Shared,
    token: &str,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<Result<Box<dyn Link>, TransportError>> {
    let dial = shared.dialer.dial(token);
    tokio::pin!(dial);

    loop {
        tokio::select! {
            biased;
            result = &mut dial => return Some(result),
            command = commands.recv() => match command {
                Some(Command::Close) | None => return None,
                Some(other) => trace!(command = ?other, "Deferred until link is up"),
            },
        }
    }
}

async fn backoff(delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> Backoff {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return Backoff::Elapsed,
            command = commands.recv() => match command {
                Some(Command::Close) | None => return Backoff::Close,
                Some(Command::RetryNow) => return Backoff::RetryNow,
                Some(other) => trace!(command = ?other, "Deferred until link is up"),
            },
        }
    }
}

async fn run_session(
    shared: &Shared,
    mut link: Box<dyn Link>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let mut armed: HashSet<String> = HashSet::new();
    let mut next_id: u64 = 1;

    // Re-arm everything before any queued request is looked at. A link that
    // cannot take the re-arm counts as a failed attempt.
    for topic in shared.active_topics() {
        if let Err(e) = link.send(Frame::subscribe(next_id, topic.as_str())).await {
            let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                link = %link.id(),
                topic = %topic,
                attempt = failures,
                error = %e,
                "Re-arm failed, dropping link"
            );
            let _ = link.close().await;
            return SessionEnd::Dropped;
        }
        next_id += 1;
        armed.insert(topic);
    }

    shared.failures.store(0, Ordering::SeqCst);
    info!(link = %link.id(), topics = armed.len(), "Connected");
    shared.set_state(ConnectionState::Connected);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let result = match command {
                    Some(Command::Arm(topic)) => {
                        if armed.contains(&topic) {
                            trace!(topic = %topic, "Already armed on this link");
                            continue;
                        }
                        let result = link.send(Frame::subscribe(next_id, topic.as_str())).await;
                        next_id += 1;
                        if result.is_ok() {
                            debug!(topic = %topic, "Topic armed");
                            armed.insert(topic);
                        }
                        result
                    }
                    Some(Command::Release(topic)) => {
                        if !armed.remove(&topic) {
                            trace!(topic = %topic, "Not armed on this link");
                            continue;
                        }
                        let result = link.send(Frame::unsubscribe(next_id, topic.as_str())).await;
                        next_id += 1;
                        debug!(topic = %topic, "Topic released");
                        result
                    }
                    Some(Command::RetryNow) => continue,
                    Some(Command::Close) | None => {
                        for topic in armed.drain() {
                            let _ = link.send(Frame::unsubscribe(next_id, topic)).await;
                            next_id += 1;
                        }
                        if let Err(e) = link.close().await {
                            debug!(link = %link.id(), error = %e, "Close failed");
                        }
                        return SessionEnd::Closed;
                    }
                };

                if let Err(e) = result {
                    warn!(link = %link.id(), error = %e, "Send failed, dropping link");
                    let _ = link.close().await;
                    return SessionEnd::Dropped;
                }
            }

            frame = link.recv() => match frame {
                Ok(Some(frame)) => {
                    if let Err(e) = handle_frame(shared, link.as_mut(), frame).await {
                        warn!(link = %link.id(), error = %e, "Reply failed, dropping link");
                        let _ = link.close().await;
                        return SessionEnd::Dropped;
                    }
                }
                Ok(None) => {
                    info!(link = %link.id(), "Link closed by server");
                    return SessionEnd::Dropped;
                }
                Err(e) => {
                    warn!(link = %link.id(), error = %e, "Link error");
                    let _ = link.close().await;
                    return SessionEnd::Dropped;
                }
            },
        }
    }
}

async fn handle_frame(
    shared: &Shared,
    link: &mut dyn Link,
    frame: Frame,
) -> Result<(), TransportError> {
    metrics::record_frame(frame.frame_type().as_str());

    match frame {
        Frame::Publish {
            channel, payload, ..
        } => {
            trace!(topic = %channel, bytes = payload.len(), "Push received");
            match shared.handler() {
                Some(handler) => handler.on_publish(&channel, Bytes::from(payload)),
                None => debug!(topic = %channel, "No registry attached, push dropped"),
            }
        }
        Frame::Ping { timestamp } => link.send(Frame::pong(timestamp)).await?,
        Frame::Pong { .. } => {}
        Frame::Ack { id } => trace!(id, "Request acknowledged"),
        Frame::Error { id, code, message } => {
            warn!(id, code, message = %message, "Server rejected request");
        }
        other => {
            debug!(frame_type = ?other.frame_type(), "Unexpected frame");
        }
    }

    Ok(())
}
