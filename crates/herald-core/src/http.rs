//! JSON-over-HTTP implementation of [`NotificationApi`].

use crate::api::{ApiError, CountBody, NotificationApi};
use crate::notification::Notification;
use async_trait::async_trait;
use herald_transport::CredentialSource;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for the notification endpoints.
pub struct HttpNotificationApi {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpNotificationApi {
    /// Client rooted at `base_url`, e.g. `https://example.com/api`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot serve as a base or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or(ApiError::Unauthenticated)?;
        Ok(request.bearer_auth(token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self.authorized(request)?.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let bytes = self.execute(request).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn list(&self, subject_id: &str) -> Result<Vec<Notification>, ApiError> {
        let url = self.endpoint(&["notifications", subject_id]);
        let notifications: Vec<Notification> = self.fetch(self.client.get(url)).await?;
        debug!(subject = %subject_id, count = notifications.len(), "Listed notifications");
        Ok(notifications)
    }

    async fn unread_count(&self, subject_id: &str) -> Result<u64, ApiError> {
        let url = self.endpoint(&["notifications", subject_id, "unread-count"]);
        let body: CountBody = self.fetch(self.client.get(url)).await?;
        Ok(body.into())
    }

    async fn mark_read(&self, subscription_id: &str) -> Result<Notification, ApiError> {
        let url = self.endpoint(&["notifications", "subscriptions", subscription_id, "read"]);
        self.fetch(self.client.put(url)).await
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        let url = self.endpoint(&["notifications", "read-all"]);
        self.execute(self.client.put(url)).await?;
        Ok(())
    }
}
