//! Transport instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

use crate::connection::ConnectionState;
use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const FRAMES_RECEIVED_TOTAL: &str = "herald_frames_received_total";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "herald_reconnect_attempts_total";
    pub const PAYLOAD_PARSE_ERRORS_TOTAL: &str = "herald_payload_parse_errors_total";
    pub const ACTIVE_TOPICS: &str = "herald_active_topics";
    pub const CONNECTION_STATE: &str = "herald_connection_state";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::FRAMES_RECEIVED_TOTAL,
        "Frames received from the server, by frame type"
    );
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Dial attempts made by the reconnect loop"
    );
    metrics::describe_counter!(
        names::PAYLOAD_PARSE_ERRORS_TOTAL,
        "Pushed payloads that were not valid JSON"
    );
    metrics::describe_gauge!(names::ACTIVE_TOPICS, "Topics with at least one listener");
    metrics::describe_gauge!(
        names::CONNECTION_STATE,
        "0 disconnected, 1 connecting, 2 connected, 3 failed"
    );
}

pub(crate) fn record_frame(kind: &'static str) {
    counter!(names::FRAMES_RECEIVED_TOTAL, "type" => kind).increment(1);
}

pub(crate) fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(1);
}

pub(crate) fn record_parse_error() {
    counter!(names::PAYLOAD_PARSE_ERRORS_TOTAL).increment(1);
}

pub(crate) fn set_active_topics(count: usize) {
    gauge!(names::ACTIVE_TOPICS).set(count as f64);
}

pub(crate) fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Failed => 3.0,
    };
    gauge!(names::CONNECTION_STATE).set(value);
}
