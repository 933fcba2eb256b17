//! Notification data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Broadcast,
    System,
    User,
    #[default]
    #[serde(other)]
    Other,
}

/// One server-originated message, as listed by the REST API and pushed on
/// the notification topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    /// Per-recipient delivery record. Key for mark-read; absent until the
    /// notification is bound to this subject.
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: Category,
    /// Roles the notification was broadcast to. `None` or empty means all.
    #[serde(default)]
    pub target_roles: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Identity used for deduplication: the delivery record when present,
    /// else the notification ID.
    #[must_use]
    pub fn dedup_key(&self) -> &str {
        self.subscription_id.as_deref().unwrap_or(&self.id)
    }

    #[must_use]
    pub fn targets_role(&self, role: &str) -> bool {
        match &self.target_roles {
            Some(roles) if !roles.is_empty() => roles.iter().any(|r| r == role),
            _ => true,
        }
    }

    /// Mark the notification read at `at`.
    ///
    /// Returns `true` if this call performed the unread-to-read transition.
    /// An already read notification keeps its original `read_at`.
    pub fn mark_read_at(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }

    /// Make `read_at` agree with `is_read`: a read item without a timestamp
    /// gets `now`, an unread item loses any timestamp it carried.
    pub fn settle_read_at(&mut self, now: DateTime<Utc>) {
        if self.is_read {
            self.read_at.get_or_insert(now);
        } else {
            self.read_at = None;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::notification;
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "id": "n1",
            "subscriptionId": "s1",
            "title": "Maintenance",
            "content": "Tonight",
            "category": "broadcast",
            "targetRoles": ["admin"],
            "createdAt": "2024-05-01T12:00:00Z",
            "isRead": false,
            "readAt": null
        }"#;

        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.id, "n1");
        assert_eq!(n.subscription_id.as_deref(), Some("s1"));
        assert_eq!(n.category, Category::Broadcast);
        assert!(!n.is_read);
        assert!(n.read_at.is_none());
    }

    #[test]
    fn test_minimal_payload_and_unknown_category() {
        let json = r#"{"id":"n2","createdAt":"2024-05-01T12:00:00Z","category":"billing"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.category, Category::Other);
        assert!(n.subscription_id.is_none());
        assert!(n.target_roles.is_none());
        assert!(!n.is_read);
    }

    #[test]
    fn test_dedup_key() {
        assert_eq!(notification("n1", Some("s1"), 0).dedup_key(), "s1");
        assert_eq!(notification("n1", None, 0).dedup_key(), "n1");
    }

    #[test]
    fn test_targets_role() {
        let mut n = notification("n1", None, 0);
        assert!(n.targets_role("member"));

        n.target_roles = Some(vec![]);
        assert!(n.targets_role("member"));

        n.target_roles = Some(vec!["admin".into()]);
        assert!(n.targets_role("admin"));
        assert!(!n.targets_role("member"));
    }

    #[test]
    fn test_mark_read_at_is_monotonic() {
        let mut n = notification("n1", Some("s1"), 0);
        let first = n.created_at + chrono::Duration::minutes(1);
        let second = n.created_at + chrono::Duration::minutes(2);

        assert!(n.mark_read_at(first));
        assert!(!n.mark_read_at(second));
        assert!(n.is_read);
        assert_eq!(n.read_at, Some(first));
    }

    #[test]
    fn test_settle_read_at() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::hours(1);

        let mut read = notification("n1", None, 0);
        read.is_read = true;
        read.settle_read_at(now);
        assert_eq!(read.read_at, Some(now));
        read.settle_read_at(now + chrono::Duration::minutes(5));
        assert_eq!(read.read_at, Some(now));

        let mut unread = notification("n2", None, 0);
        unread.read_at = Some(earlier);
        unread.settle_read_at(now);
        assert!(unread.read_at.is_none());
    }
}
