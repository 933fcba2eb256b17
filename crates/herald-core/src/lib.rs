//! # herald-core
//!
//! Notification domain for Herald clients.
//!
//! [`NotificationStore`] keeps the notification list and unread count for one
//! subject consistent across REST pulls ([`NotificationApi`]), pushes received
//! through a [`herald_transport::SubscriptionRegistry`], and optimistic local
//! mark-read edits.
//!
//! ```rust,ignore
//! use herald_core::{HttpNotificationApi, NotificationStore};
//!
//! let api = Arc::new(HttpNotificationApi::new("https://example.com/api", credentials)?);
//! let store = NotificationStore::new(api, registry);
//! store.initialize("u1").await?;
//!
//! let mut changes = store.watch();
//! while changes.changed().await.is_ok() {
//!     println!("{} unread", changes.borrow().unread_count);
//! }
//! ```

pub mod api;
pub mod http;
pub mod notification;
pub mod store;
pub mod topic;

pub use api::{ApiError, NotificationApi};
pub use http::HttpNotificationApi;
pub use notification::{Category, Notification};
pub use store::{NotificationSnapshot, NotificationStore, StoreError};
pub use topic::{count_topic, notification_topic};
