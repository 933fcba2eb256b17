//! Request/response collaborator used by the store.

use crate::notification::Notification;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// REST API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the response body not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// No bearer credential was available; nothing was sent.
    #[error("No bearer credential available")]
    Unauthenticated,

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Unread count body: a bare integer or `{"count": n}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CountBody {
    Bare(u64),
    Wrapped { count: u64 },
}

impl From<CountBody> for u64 {
    fn from(body: CountBody) -> u64 {
        match body {
            CountBody::Bare(count) | CountBody::Wrapped { count } => count,
        }
    }
}

/// Notification endpoints of the REST API.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Current notifications for `subject_id`, newest first.
    async fn list(&self, subject_id: &str) -> Result<Vec<Notification>, ApiError>;

    async fn unread_count(&self, subject_id: &str) -> Result<u64, ApiError>;

    /// Mark one delivery record read. Returns the updated record.
    async fn mark_read(&self, subscription_id: &str) -> Result<Notification, ApiError>;

    async fn mark_all_read(&self) -> Result<(), ApiError>;
}
