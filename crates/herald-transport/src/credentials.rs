//! Read-only access to the session identity.
//!
//! The transport may be constructed before login completes, so an absent
//! credential is a normal state rather than an error.

use std::sync::RwLock;

/// Environment variable read by [`EnvCredentials`] for the subject ID.
pub const SUBJECT_ID_ENV: &str = "HERALD_SUBJECT_ID";

/// Environment variable read by [`EnvCredentials`] for the bearer token.
pub const TOKEN_ENV: &str = "HERALD_TOKEN";

/// Supplies the current subject ID and bearer credential.
///
/// Implementations are read synchronously on every use, so a credential that
/// appears after login is picked up by the next `connect()`.
pub trait CredentialSource: Send + Sync {
    fn subject_id(&self) -> Option<String>;

    fn bearer_token(&self) -> Option<String>;
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Credentials held in memory, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: RwLock<(Option<String>, Option<String>)>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(subject_id: Option<String>, token: Option<String>) -> Self {
        Self {
            inner: RwLock::new((subject_id, token)),
        }
    }

    /// Replace both values, e.g. after a login or logout.
    pub fn set(&self, subject_id: Option<String>, token: Option<String>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = (subject_id, token);
    }
}

impl CredentialSource for StaticCredentials {
    fn subject_id(&self) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        non_blank(guard.0.clone())
    }

    fn bearer_token(&self) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        non_blank(guard.1.clone())
    }
}

/// Credentials read from `HERALD_SUBJECT_ID` and `HERALD_TOKEN` on each call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn subject_id(&self) -> Option<String> {
        non_blank(std::env::var(SUBJECT_ID_ENV).ok())
    }

    fn bearer_token(&self) -> Option<String> {
        non_blank(std::env::var(TOKEN_ENV).ok())
    }
}
