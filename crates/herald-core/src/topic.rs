//! Per-subject topic names.

/// Topic carrying newly created notifications for `subject_id`.
#[must_use]
pub fn notification_topic(subject_id: &str) -> String {
    format!("notifications/{subject_id}")
}

/// Topic carrying the authoritative unread count for `subject_id`.
#[must_use]
pub fn count_topic(subject_id: &str) -> String {
    format!("notifications/{subject_id}/count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(notification_topic("u1"), "notifications/u1");
        assert_eq!(count_topic("u1"), "notifications/u1/count");
    }
}
