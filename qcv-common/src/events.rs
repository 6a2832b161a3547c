//! Event types for the review session event system

use serde::{Deserialize, Serialize};

/// Review session event types
///
/// Broadcast by the session whenever the ledger or commit state changes, so
/// view-layer consumers can update submit buttons, pending-change counters,
/// and the status pivot without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Pending-change count changed
    ///
    /// Emitted atomically with every ledger mutation that changes the count;
    /// `submit_enabled` is always `count > 0`, never out of step with it.
    DirtyChanged {
        count: usize,
        submit_enabled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A status-column edit fully applied; the status pivot cells for these
    /// group keys are stale and must be recomputed
    StatusInvalidated {
        metric_name: String,
        stage: String,
        group_keys: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Commit acknowledged by the store; the in-memory document is stale
    /// and the caller must reload
    CommitSucceeded {
        document_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Commit rejected or failed; the ledger is intact and can be retried
    CommitFailed {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Document discarded or replaced; in-flight media fetches were aborted
    /// and any pending changes dropped
    DocumentClosed {
        document_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = SessionEvent::DirtyChanged {
            count: 3,
            submit_enabled: true,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DirtyChanged");
        assert_eq!(json["count"], 3);
        assert_eq!(json["submit_enabled"], true);
    }
}
