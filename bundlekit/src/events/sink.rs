//! Lifecycle event record and the sinks that receive it.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{NODES_TIMED_OUT, NODE_REJECTED, PHASE_FAILED};
use crate::utils::now_rfc3339;

/// One lifecycle event of a collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleEvent {
    /// One of the event names in [`crate::events`].
    pub kind: &'static str,
    /// Event payload.
    pub data: Value,
    /// When the event was recorded (RFC 3339).
    pub at: String,
}

impl BundleEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: &'static str, data: Value) -> Self {
        Self {
            kind,
            data,
            at: now_rfc3339(),
        }
    }

    /// A string field of the payload.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// True for events that report something going wrong.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, PHASE_FAILED | NODE_REJECTED | NODES_TIMED_OUT)
    }
}

/// Receives lifecycle events. Called from handlers and the phase loop, so it
/// must not block.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: BundleEvent);
}

/// Writes events to the log, failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn record(&self, event: BundleEvent) {
        let phase = event.field("phase").unwrap_or_default();
        let node = event.field("node").unwrap_or_default();
        if event.is_failure() {
            warn!(event = event.kind, phase, node, data = %event.data, "bundle event");
        } else {
            info!(event = event.kind, phase, node, data = %event.data, "bundle event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NODE_COMPLETED, PHASE_STARTED};
    use serde_json::json;

    #[test]
    fn test_event_fields() {
        let event = BundleEvent::new(NODE_COMPLETED, json!({ "node": "node-a", "size": 12 }));

        assert_eq!(event.field("node"), Some("node-a"));
        assert_eq!(event.field("size"), None);
        assert_eq!(event.field("phase"), None);
        assert!(!event.is_failure());
        assert!(!event.at.is_empty());
    }

    #[test]
    fn test_failure_kinds() {
        assert!(BundleEvent::new(PHASE_FAILED, Value::Null).is_failure());
        assert!(BundleEvent::new(NODE_REJECTED, Value::Null).is_failure());
        assert!(BundleEvent::new(NODES_TIMED_OUT, json!({ "pending": ["node-b"] })).is_failure());
        assert!(!BundleEvent::new(PHASE_STARTED, json!({ "phase": "init" })).is_failure());
    }

    #[test]
    fn test_logging_sink_accepts_any_payload() {
        LoggingEventSink.record(BundleEvent::new(PHASE_STARTED, json!({ "phase": "init" })));
        LoggingEventSink.record(BundleEvent::new(PHASE_FAILED, Value::Null));
    }

    #[test]
    fn test_event_serializes_kind() {
        let event = BundleEvent::new(NODES_TIMED_OUT, json!({ "pending": ["node-b"] }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "nodes.timed_out");
        assert_eq!(value["data"]["pending"][0], "node-b");
    }
}
