//! Client-side notification state.
//!
//! [`NotificationStore`] holds the notification list and the unread count for
//! one subject and reconciles three sources: REST pulls, pushes on the two
//! per-subject topics, and optimistic local mark-read edits.
//!
//! The unread count is never derived from the list, which may be a partial
//! window. It is seeded by a pull, bumped by one per new unread push,
//! lowered by one per local mark-read, and overwritten by every count push.

use crate::api::{ApiError, CountBody, NotificationApi};
use crate::notification::Notification;
use crate::topic::{count_topic, notification_topic};
use chrono::Utc;
use herald_transport::{Payload, Subscription, SubscriptionRegistry};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `refresh()` was called before `initialize()`.
    #[error("Store is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Point-in-time view of the store, as rendered by the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub subject_id: Option<String>,
    /// Newest first.
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
    /// Set once both topic subscriptions are open.
    pub initialized: bool,
}

impl NotificationSnapshot {
    fn position(&self, key: &str) -> Option<usize> {
        self.notifications.iter().position(|n| n.dedup_key() == key)
    }
}

/// Single source of truth for one subject's notifications.
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<NotificationSnapshot>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl NotificationStore {
    #[must_use]
    pub fn new(api: Arc<dyn NotificationApi>, registry: Arc<SubscriptionRegistry>) -> Arc<Self> {
        let (state, _) = watch::channel(NotificationSnapshot::default());
        Arc::new(Self {
            api,
            registry,
            state,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> NotificationSnapshot {
        self.state.borrow().clone()
    }

    /// Change notifications; the receiver is marked changed on every mutation.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<NotificationSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn unread_count(&self) -> u64 {
        self.state.borrow().unread_count
    }

    /// Pull the list and count for `subject_id`, then subscribe to both
    /// of its topics.
    ///
    /// The two pulls run concurrently and are applied independently; the
    /// subscriptions are opened even if a pull failed. A previous
    /// initialization is discarded first.
    ///
    /// # Errors
    ///
    /// Returns the first pull error. The store is usable regardless.
    pub async fn initialize(self: &Arc<Self>, subject_id: &str) -> Result<(), StoreError> {
        self.release_subscriptions();
        self.state.send_replace(NotificationSnapshot {
            subject_id: Some(subject_id.to_string()),
            ..Default::default()
        });

        let result = self.pull(subject_id).await;

        let notifications = {
            let store = Arc::downgrade(self);
            self.registry
                .subscribe(notification_topic(subject_id), move |payload| {
                    on_notification_payload(&store, payload);
                })
        };
        let count = {
            let store = Arc::downgrade(self);
            self.registry.subscribe(count_topic(subject_id), move |payload| {
                on_count_payload(&store, payload);
            })
        };
        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = vec![notifications, count];

        self.state.send_if_modified(|state| {
            if state.subject_id.as_deref() != Some(subject_id) {
                return false;
            }
            state.initialized = true;
            true
        });
        info!(subject = %subject_id, "Notification store initialized");

        result
    }

    /// Re-pull the list and count and merge them into the local state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotInitialized`] before `initialize()`, else the
    /// first pull error. Whatever pull succeeded is still applied.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let subject_id = self
            .state
            .borrow()
            .subject_id
            .clone()
            .ok_or(StoreError::NotInitialized)?;

        self.pull(&subject_id).await
    }

    async fn pull(&self, subject_id: &str) -> Result<(), StoreError> {
        let (list, count) = tokio::join!(
            self.api.list(subject_id),
            self.api.unread_count(subject_id)
        );

        let mut first_error = None;

        match list {
            Ok(mut pulled) => {
                let now = Utc::now();
                for n in &mut pulled {
                    n.settle_read_at(now);
                }
                self.state.send_if_modified(|state| {
                    if state.subject_id.as_deref() != Some(subject_id) {
                        return false;
                    }
                    state.notifications = merge(&state.notifications, pulled);
                    true
                });
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Notification list pull failed");
                first_error = Some(e);
            }
        }

        match count {
            Ok(count) => {
                self.state.send_if_modified(|state| {
                    if state.subject_id.as_deref() != Some(subject_id) {
                        return false;
                    }
                    state.unread_count = count;
                    true
                });
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Unread count pull failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Apply a pushed notification.
    ///
    /// A notification already present (by dedup key) is not inserted again;
    /// if the push reports it read, the local copy is marked read in place.
    /// A new notification is prepended and, when unread, raises the count by
    /// one. Returns whether the state changed.
    pub fn apply_pushed_notification(&self, mut notification: Notification) -> bool {
        let now = Utc::now();
        notification.settle_read_at(now);

        self.state.send_if_modified(|state| {
            if let Some(i) = state.position(notification.dedup_key()) {
                if notification.is_read {
                    let read_at = notification.read_at.unwrap_or(now);
                    return state.notifications[i].mark_read_at(read_at);
                }
                debug!(key = %notification.dedup_key(), "Duplicate push ignored");
                return false;
            }

            if !notification.is_read {
                state.unread_count += 1;
            }
            state.notifications.insert(0, notification);
            true
        })
    }

    /// Replace the unread count with the server's authoritative value.
    pub fn apply_pushed_count(&self, count: u64) {
        self.state.send_if_modified(|state| {
            let changed = state.unread_count != count;
            state.unread_count = count;
            changed
        });
    }

    /// Mark one notification read.
    ///
    /// The local copy and the count are updated before the request is sent.
    /// Returns `Ok(false)` without a request when the item is already read
    /// or has no delivery record.
    ///
    /// # Errors
    ///
    /// Returns the request error. The local change is kept; `refresh()`
    /// reconciles.
    pub async fn mark_read(&self, item: &Notification) -> Result<bool, StoreError> {
        let Some(subscription_id) = item.subscription_id.as_deref() else {
            return Ok(false);
        };
        if item.is_read {
            return Ok(false);
        }

        let now = Utc::now();
        let mut already_read = false;
        self.state.send_if_modified(|state| {
            let local = state
                .notifications
                .iter_mut()
                .find(|n| n.subscription_id.as_deref() == Some(subscription_id));
            match local {
                Some(n) if n.is_read => {
                    already_read = true;
                    false
                }
                Some(n) => {
                    n.mark_read_at(now);
                    state.unread_count = state.unread_count.saturating_sub(1);
                    true
                }
                None => {
                    state.unread_count = state.unread_count.saturating_sub(1);
                    true
                }
            }
        });
        if already_read {
            return Ok(false);
        }

        match self.api.mark_read(subscription_id).await {
            Ok(_) => {
                debug!(subscription = %subscription_id, "Marked read");
                Ok(true)
            }
            Err(e) => {
                warn!(subscription = %subscription_id, error = %e, "Mark read failed, keeping local state");
                Err(e.into())
            }
        }
    }

    /// Mark every notification read and zero the count, then send one bulk
    /// request. Returns `Ok(false)` without a request when nothing is unread.
    ///
    /// # Errors
    ///
    /// Returns the request error; the local change is kept.
    pub async fn mark_all_read(&self) -> Result<bool, StoreError> {
        let now = Utc::now();
        let changed = self.state.send_if_modified(|state| {
            let mut changed = state.unread_count != 0;
            for n in &mut state.notifications {
                changed |= n.mark_read_at(now);
            }
            state.unread_count = 0;
            changed
        });
        if !changed {
            return Ok(false);
        }

        match self.api.mark_all_read().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Mark all read failed, keeping local state");
                Err(e.into())
            }
        }
    }

    /// Release both topic subscriptions. State is kept.
    pub fn shutdown(&self) {
        self.release_subscriptions();
        self.state.send_if_modified(|state| {
            let changed = state.initialized;
            state.initialized = false;
            changed
        });
    }

    fn release_subscriptions(&self) {
        let released = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for subscription in released {
            debug!(topic = %subscription.topic(), "Releasing topic");
            subscription.unsubscribe();
        }
    }
}

fn on_notification_payload(store: &Weak<NotificationStore>, payload: &Payload) {
    let Some(store) = store.upgrade() else {
        return;
    };
    let Some(value) = payload.as_json() else {
        warn!("Ignoring non-JSON notification push");
        return;
    };
    match serde_json::from_value::<Notification>(value.clone()) {
        Ok(notification) => {
            store.apply_pushed_notification(notification);
        }
        Err(e) => warn!(error = %e, "Ignoring malformed notification push"),
    }
}

fn on_count_payload(store: &Weak<NotificationStore>, payload: &Payload) {
    let Some(store) = store.upgrade() else {
        return;
    };
    let count = match payload {
        Payload::Json(value) => serde_json::from_value::<CountBody>(value.clone())
            .ok()
            .map(u64::from),
        Payload::Raw(_) => payload.raw_text().and_then(|t| t.trim().parse().ok()),
    };
    match count {
        Some(count) => store.apply_pushed_count(count),
        None => warn!("Ignoring malformed count push"),
    }
}

/// Merge a pulled list into the local one.
///
/// The pulled list becomes the window. Local items missing from it and newer
/// than everything pulled are pushes that raced the pull; they stay in
/// front. Read is terminal, so a locally read item stays read.
fn merge(local: &[Notification], pulled: Vec<Notification>) -> Vec<Notification> {
    let pulled_keys: HashSet<&str> = pulled.iter().map(Notification::dedup_key).collect();
    let newest_pulled = pulled.iter().map(|n| n.created_at).max();

    let mut merged: Vec<Notification> = local
        .iter()
        .filter(|n| !pulled_keys.contains(n.dedup_key()))
        .filter(|n| newest_pulled.map_or(true, |newest| n.created_at > newest))
        .cloned()
        .collect();

    let read_locally: HashMap<&str, &Notification> = local
        .iter()
        .filter(|n| n.is_read)
        .map(|n| (n.dedup_key(), n))
        .collect();

    merged.extend(pulled.into_iter().map(|mut n| {
        if let Some(read) = read_locally.get(n.dedup_key()) {
            if let Some(at) = read.read_at {
                n.mark_read_at(at);
            }
        }
        n
    }));
    merged
}
